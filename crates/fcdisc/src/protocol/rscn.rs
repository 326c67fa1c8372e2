// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSCN affected-port pages.
//!
//! Each page is one 32-bit word: the top byte carries the event qualifier
//! (bits 5..2) and the address format (bits 1..0), the low 24 bits the
//! affected identifier.

use super::addr::FcId;

/// Granularity of an affected-port page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFormat {
    Port,
    Area,
    Domain,
    Fabric,
}

impl AddressFormat {
    const fn bits(self) -> u32 {
        match self {
            Self::Port => 0,
            Self::Area => 1,
            Self::Domain => 2,
            Self::Fabric => 3,
        }
    }

    /// Mask of the identifier bits that must match.
    const fn mask(self) -> u32 {
        match self {
            Self::Port => 0x00FF_FFFF,
            Self::Area => 0x00FF_FF00,
            Self::Domain => 0x00FF_0000,
            Self::Fabric => 0,
        }
    }
}

/// One affected-port page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RscnPage {
    pub format: AddressFormat,
    pub qualifier: u8,
    pub id: FcId,
}

impl RscnPage {
    pub const fn port(id: FcId) -> Self {
        Self {
            format: AddressFormat::Port,
            qualifier: 0,
            id,
        }
    }

    pub const fn new(format: AddressFormat, id: FcId) -> Self {
        Self {
            format,
            qualifier: 0,
            id,
        }
    }

    pub fn from_word(word: u32) -> Self {
        let top = word >> 24;
        let format = match top & 0x3 {
            0 => AddressFormat::Port,
            1 => AddressFormat::Area,
            2 => AddressFormat::Domain,
            _ => AddressFormat::Fabric,
        };
        Self {
            format,
            qualifier: ((top >> 2) & 0xF) as u8,
            id: FcId::new(word),
        }
    }

    pub fn to_word(self) -> u32 {
        let top = (u32::from(self.qualifier & 0xF) << 2) | self.format.bits();
        (top << 24) | self.id.raw()
    }

    /// Whether `did` falls inside this page.
    pub fn covers(&self, did: FcId) -> bool {
        let mask = self.format.mask();
        (did.raw() & mask) == (self.id.raw() & mask)
    }

    /// Whether this page already covers everything `other` covers.
    pub fn subsumes(&self, other: &RscnPage) -> bool {
        self.format >= other.format && self.covers(other.id)
    }
}

/// Decode the page list of an RSCN payload (the words after the header).
pub fn decode_pages(words: &[u32]) -> Vec<RscnPage> {
    words.iter().copied().map(RscnPage::from_word).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_word_encoding() {
        let page = RscnPage::new(AddressFormat::Area, FcId::new(0x0A0B00));
        let word = page.to_word();
        assert_eq!(word, 0x010A_0B00);
        assert_eq!(RscnPage::from_word(word), page);
    }

    #[test]
    fn test_qualifier_is_preserved() {
        let word = (0b0101_10u32 << 24) | 0x010203;
        let page = RscnPage::from_word(word);
        assert_eq!(page.qualifier, 0b0101);
        assert_eq!(page.format, AddressFormat::Domain);
        assert_eq!(page.to_word(), word);
    }

    #[test]
    fn test_cover_by_format() {
        let did = FcId::new(0x010203);
        assert!(RscnPage::port(FcId::new(0x010203)).covers(did));
        assert!(!RscnPage::port(FcId::new(0x010204)).covers(did));
        assert!(RscnPage::new(AddressFormat::Area, FcId::new(0x0102FF)).covers(did));
        assert!(RscnPage::new(AddressFormat::Domain, FcId::new(0x01FFFF)).covers(did));
        assert!(!RscnPage::new(AddressFormat::Domain, FcId::new(0x02FFFF)).covers(did));
        assert!(RscnPage::new(AddressFormat::Fabric, FcId::UNASSIGNED).covers(did));
    }

    #[test]
    fn test_subsumes() {
        let area = RscnPage::new(AddressFormat::Area, FcId::new(0x010200));
        let port = RscnPage::port(FcId::new(0x010203));
        assert!(area.subsumes(&port));
        assert!(!port.subsumes(&area));
    }
}
