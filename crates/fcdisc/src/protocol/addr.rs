// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fibre Channel addressing: 24-bit port identifiers and 64-bit world-wide names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 24-bit Fibre Channel address (D_ID / S_ID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct FcId(u32);

impl FcId {
    /// Not yet assigned (before FLOGI completes).
    pub const UNASSIGNED: FcId = FcId(0);
    /// Fabric login server.
    pub const FABRIC: FcId = FcId(0x00FF_FFFE);
    /// Fabric controller (SCR / RSCN source).
    pub const FABRIC_CONTROLLER: FcId = FcId(0x00FF_FFFD);
    /// Directory (name) server.
    pub const NAME_SERVER: FcId = FcId(0x00FF_FFFC);
    /// Management server (FDMI).
    pub const MANAGEMENT_SERVER: FcId = FcId(0x00FF_FFFA);
    /// Address taken by the port with the higher WWPN in point-to-point mode.
    pub const P2P_LOCAL: FcId = FcId(0x0000_00EF);
    /// Address given to the peer in point-to-point mode.
    pub const P2P_REMOTE: FcId = FcId(0x0000_00E8);

    const MASK: u32 = 0x00FF_FFFF;

    pub const fn new(raw: u32) -> Self {
        FcId(raw & Self::MASK)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn domain(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn area(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn port(self) -> u8 {
        self.0 as u8
    }

    /// Well-known fabric services live in 0xFFFFF0..=0xFFFFFF.
    pub const fn is_well_known(self) -> bool {
        self.0 >= 0x00FF_FFF0
    }

    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for FcId {
    fn from(raw: u32) -> Self {
        FcId::new(raw)
    }
}

impl From<FcId> for u32 {
    fn from(id: FcId) -> Self {
        id.0
    }
}

impl fmt::Display for FcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{:06x}", self.0)
    }
}

/// World-wide name (WWPN or WWNN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wwn(u64);

impl Wwn {
    pub const ZERO: Wwn = Wwn(0);

    pub const fn new(raw: u64) -> Self {
        Wwn(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Wwn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Error returned when a WWN string is not 16 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid world-wide name: {0}")]
pub struct ParseWwnError(pub String);

impl FromStr for Wwn {
    type Err = ParseWwnError;

    /// Accepts `20:00:00:25:b5:00:00:01`, `0x20000025b5000001` or bare hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits: String = trimmed
            .strip_prefix("0x")
            .unwrap_or(trimmed)
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != 16 {
            return Err(ParseWwnError(s.to_string()));
        }
        u64::from_str_radix(&digits, 16)
            .map(Wwn)
            .map_err(|_| ParseWwnError(s.to_string()))
    }
}

impl TryFrom<String> for Wwn {
    type Error = ParseWwnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Wwn> for String {
    fn from(wwn: Wwn) -> Self {
        wwn.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcid_masks_to_24_bits() {
        let id = FcId::new(0xAB12_3456);
        assert_eq!(id.raw(), 0x12_3456);
        assert_eq!(id.domain(), 0x12);
        assert_eq!(id.area(), 0x34);
        assert_eq!(id.port(), 0x56);
    }

    #[test]
    fn test_well_known_addresses() {
        assert!(FcId::NAME_SERVER.is_well_known());
        assert!(FcId::FABRIC.is_well_known());
        assert!(!FcId::new(0x010200).is_well_known());
        assert!(!FcId::UNASSIGNED.is_assigned());
    }

    #[test]
    fn test_wwn_parse_formats() {
        let colon: Wwn = "20:00:00:25:b5:00:00:01".parse().expect("colon form");
        let hex: Wwn = "0x20000025b5000001".parse().expect("hex form");
        assert_eq!(colon, hex);
        assert_eq!(colon.to_string(), "20:00:00:25:b5:00:00:01");
        assert!("20:00".parse::<Wwn>().is_err());
        assert!("zz00000000000000".parse::<Wwn>().is_err());
    }

    #[test]
    fn test_wwn_ordering_is_numeric() {
        let low = Wwn::new(0x1000_0000_0000_0001);
        let high = Wwn::new(0x2000_0000_0000_0001);
        assert!(high > low);
    }
}
