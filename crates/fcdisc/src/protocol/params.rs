// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Login payloads: service parameters (PLOGI/FLOGI/FDISC/PDISC), PRLI and ADISC.

use super::addr::{FcId, Wwn};
use super::els::LsRjt;
use super::els::{RejectExplanation, RejectReason};
use crate::error::ValidationError;

/// Smallest and largest receive data field sizes permitted by FC-FS.
pub const MIN_RX_SIZE: u16 = 256;
pub const MAX_RX_SIZE: u16 = 2112;

/// FC-4 type code for SCSI-FCP.
pub const FC4_TYPE_FCP: u8 = 0x08;

/// Common and class-3 service parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceParams {
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    /// Responder is an F_Port (set in FLOGI/FDISC ACC from a switch).
    pub fport: bool,
    /// Fabric will hand out additional N_Port IDs (NPIV).
    pub multiple_nport_ids: bool,
    /// Fabric guarantees the assigned address is unchanged since the last login.
    pub clean_address: bool,
    pub e_d_tov_ms: u32,
    pub r_a_tov_ms: u32,
    pub bb_credit: u16,
    pub rx_size: u16,
    pub class3: bool,
}

impl ServiceParams {
    /// Parameters advertised by a local port.
    pub fn local(wwpn: Wwn, wwnn: Wwn, e_d_tov_ms: u32, r_a_tov_ms: u32) -> Self {
        Self {
            wwpn,
            wwnn,
            fport: false,
            multiple_nport_ids: false,
            clean_address: false,
            e_d_tov_ms,
            r_a_tov_ms,
            bb_credit: 16,
            rx_size: MAX_RX_SIZE,
            class3: true,
        }
    }

    /// Check the fields a login depends on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.wwpn.is_zero() {
            return Err(ValidationError::ZeroPortName);
        }
        if self.wwnn.is_zero() {
            return Err(ValidationError::ZeroNodeName);
        }
        if !(MIN_RX_SIZE..=MAX_RX_SIZE).contains(&self.rx_size) || self.rx_size % 4 != 0 {
            return Err(ValidationError::ReceiveSize(self.rx_size));
        }
        if !self.class3 {
            return Err(ValidationError::Class3Unsupported);
        }
        Ok(())
    }
}

impl ValidationError {
    /// LS_RJT sent back to a peer whose login payload failed validation.
    pub fn reject(&self) -> LsRjt {
        let explanation = match self {
            Self::ZeroPortName | Self::WwnCollision(_) => RejectExplanation::InvalidPortName,
            Self::ZeroNodeName => RejectExplanation::InvalidNodeName,
            Self::ReceiveSize(_) => RejectExplanation::InvalidReceiveSize,
            Self::Class3Unsupported => RejectExplanation::ServiceParamOptions,
        };
        LsRjt::new(RejectReason::UnableToPerform, explanation)
    }
}

/// Roles negotiated through PRLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fc4Roles {
    pub initiator: bool,
    pub target: bool,
}

/// PRLI / PRLO service parameter page for FCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrliParams {
    pub fc4_type: u8,
    pub initiator: bool,
    pub target: bool,
    /// Sequence-level retry (FCP-2 confirmed completion).
    pub retry: bool,
}

impl PrliParams {
    pub fn fcp(roles: Fc4Roles) -> Self {
        Self {
            fc4_type: FC4_TYPE_FCP,
            initiator: roles.initiator,
            target: roles.target,
            retry: true,
        }
    }

    pub fn roles(&self) -> Fc4Roles {
        Fc4Roles {
            initiator: self.initiator,
            target: self.target,
        }
    }
}

/// ADISC payload: identity of the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdiscParams {
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    pub port_id: FcId,
}

/// RLS / RPS accept body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkErrorStatus {
    pub link_failures: u32,
    pub loss_of_sync: u32,
    pub loss_of_signal: u32,
    pub primitive_seq_errors: u32,
    pub invalid_tx_words: u32,
    pub invalid_crc: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ServiceParams {
        ServiceParams::local(Wwn::new(0x10), Wwn::new(0x20), 2000, 10_000)
    }

    #[test]
    fn test_local_params_are_valid() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn test_zero_wwpn_rejected() {
        let sp = ServiceParams {
            wwpn: Wwn::ZERO,
            ..params()
        };
        let err = sp.validate().expect_err("zero wwpn");
        assert_eq!(err, ValidationError::ZeroPortName);
        assert_eq!(err.reject().explanation, RejectExplanation::InvalidPortName);
    }

    #[test]
    fn test_rx_size_bounds() {
        for bad in [0u16, 128, 2116, 2048 + 2] {
            let sp = ServiceParams {
                rx_size: bad,
                ..params()
            };
            assert_eq!(sp.validate(), Err(ValidationError::ReceiveSize(bad)));
        }
    }

    #[test]
    fn test_prli_roles() {
        let prli = PrliParams::fcp(Fc4Roles {
            initiator: false,
            target: true,
        });
        assert_eq!(prli.fc4_type, FC4_TYPE_FCP);
        assert!(prli.roles().target);
        assert!(!prli.roles().initiator);
    }
}
