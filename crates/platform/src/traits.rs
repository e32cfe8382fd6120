//! Collaborator traits consumed by the protocol crate

use crate::PlatformResult;

/// UICC application selector for challenge computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AkaAppType {
    /// GSM SIM application (EAP-SIM, RAND-only challenge)
    GsmSim,
    /// UMTS AKA application (EAP-AKA / EAP-AKA', RAND + AUTN challenge)
    UmtsAka,
}

/// UICC / SIM-card oracle used by the EAP method state machines.
///
/// The challenge and response formats are the raw card-interface framing:
///
/// ```text
/// AKA challenge:  [RAND len | RAND | AUTN len | AUTN]
/// AKA success:    [0xDB | RES len | RES | IK len | IK | CK len | CK]
/// AKA sync fail:  [0xDC | AUTS len | AUTS]
/// SIM challenge:  [RAND len | RAND]
/// SIM response:   [SRES len | SRES | Kc len | Kc]
/// ```
///
/// Implementations must be usable from a single session at a time; the
/// protocol crate serializes calls within one session.
pub trait SimAuthenticator: Send + Sync {
    /// Returns the subscriber identity (IMSI), if the card can provide one.
    fn subscriber_id(&self) -> Option<String>;

    /// Runs the authentication algorithm on the card.
    ///
    /// # Errors
    ///
    /// Returns an error if the card is absent or the application fails.
    fn authenticate(&self, app: AkaAppType, challenge: &[u8]) -> PlatformResult<Vec<u8>>;
}
