//! EAP-AKA method state machine (RFC 4187)
//!
//! ```text
//! Created --+--> Identity --+--> Challenge --> Final
//!           |               |
//!           +---------------+
//! ```
//!
//! A challenge whose AUTN fails the sequence-number check on the card
//! produces an AKA-Synchronization-Failure response and stays in the
//! Challenge state; the server then retries with a fresh challenge. A
//! Notification subtype may arrive in any state, at most once per session.
//!
//! EAP-AKA' (RFC 5448) runs the same machine with a different method type,
//! identity prefix and extra challenge validation; see
//! [`crate::eap::aka_prime`].

use std::sync::Arc;

use ikepeer_platform::{AkaAppType, SimAuthenticator};

use super::crypto::{aka_master_key, compute_mac, SimAkaKeys};
use super::message::{EapCode, EapMessage};
use super::simaka::attribute::{
    client_error, AT_ANY_ID_REQ, AT_AUTN, AT_ENCR_DATA, AT_FULLAUTH_ID_REQ, AT_IV, AT_MAC,
    AT_PERMANENT_ID_REQ, AT_RAND,
};
use super::simaka::{zero_mac_in_message, SimAkaAttribute, SimAkaSubtype, SimAkaTypeData};
use super::{EapMethodStateMachine, EapResult};
use crate::ike::logging;
use crate::ike::{Error, Result};

/// UICC response tag: successful 3G authentication
const TAG_SUCCESS: u8 = 0xDB;
/// UICC response tag: synchronization failure
const TAG_SYNC_FAILURE: u8 = 0xDC;

/// IK and CK lengths (RFC 4187 Section 1)
const IK_LEN: usize = 16;
const CK_LEN: usize = 16;

/// Notification code P bit: set before the challenge round
const NOTIFICATION_PRE_CHALLENGE: u16 = 0x4000;

/// Method state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AkaState {
    /// No method message processed yet
    Created,
    /// AKA-Identity round in progress
    Identity,
    /// AKA-Challenge round in progress
    Challenge,
    /// Method concluded
    Final,
}

/// Method variant: plain AKA or AKA' with its network-name binding
#[derive(Debug, Clone)]
pub(crate) enum AkaVariant {
    Aka,
    AkaPrime {
        network_name: String,
        allow_mismatched_network_names: bool,
    },
}

impl AkaVariant {
    fn eap_type(&self) -> u8 {
        match self {
            AkaVariant::Aka => super::message::TYPE_AKA,
            AkaVariant::AkaPrime { .. } => super::message::TYPE_AKA_PRIME,
        }
    }

    /// Identity prefix: "0" for AKA, "6" for AKA' (RFC 5448 Section 3)
    fn identity_prefix(&self) -> &'static str {
        match self {
            AkaVariant::Aka => "0",
            AkaVariant::AkaPrime { .. } => "6",
        }
    }

    fn method_name(&self) -> &'static str {
        match self {
            AkaVariant::Aka => "EAP-AKA",
            AkaVariant::AkaPrime { .. } => "EAP-AKA'",
        }
    }
}

/// EAP-AKA / EAP-AKA' peer state machine
pub struct EapAkaMachine {
    authenticator: Arc<dyn SimAuthenticator>,
    variant: AkaVariant,
    state: AkaState,
    identity: Vec<u8>,
    keys: Option<SimAkaKeys>,
    had_successful_challenge: bool,
    notification_handled: bool,
}

impl EapAkaMachine {
    /// Create an EAP-AKA machine
    pub fn new(authenticator: Arc<dyn SimAuthenticator>) -> Self {
        Self::with_variant(authenticator, AkaVariant::Aka)
    }

    pub(crate) fn with_variant(
        authenticator: Arc<dyn SimAuthenticator>,
        variant: AkaVariant,
    ) -> Self {
        EapAkaMachine {
            authenticator,
            variant,
            state: AkaState::Created,
            identity: Vec::new(),
            keys: None,
            had_successful_challenge: false,
            notification_handled: false,
        }
    }

    /// Current method state
    pub fn state(&self) -> AkaState {
        self.state
    }

    fn transition(&mut self, next: AkaState) {
        logging::log_eap_transition(
            self.variant.method_name(),
            &format!("{:?}", self.state),
            &format!("{:?}", next),
        );
        self.state = next;
    }

    fn prefixed_imsi(&self) -> Result<Vec<u8>> {
        let imsi = self.authenticator.subscriber_id().ok_or_else(|| {
            Error::IdentityUnavailable("IMSI not available from the UICC".to_string())
        })?;
        Ok(format!("{}{}", self.variant.identity_prefix(), imsi).into_bytes())
    }

    fn client_error(&self, identifier: u8, code: u16) -> EapResult {
        let td = SimAkaTypeData::new(
            SimAkaSubtype::ClientError,
            vec![SimAkaAttribute::ClientErrorCode(code)],
        );
        EapResult::Response(
            EapMessage::response(identifier, self.variant.eap_type(), td.encode()).encode(),
        )
    }

    fn respond(&self, identifier: u8, td: SimAkaTypeData) -> EapResult {
        EapResult::Response(
            EapMessage::response(identifier, self.variant.eap_type(), td.encode()).encode(),
        )
    }

    /// Build a response whose AT_MAC is computed over the response itself.
    fn respond_with_mac(
        &self,
        identifier: u8,
        subtype: SimAkaSubtype,
        mut attributes: Vec<SimAkaAttribute>,
        extra: &[u8],
    ) -> Result<EapResult> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| Error::Internal("MAC requested before key derivation".to_string()))?;

        attributes.push(SimAkaAttribute::Mac([0u8; 16]));
        let td = SimAkaTypeData::new(subtype, attributes);
        let unsigned =
            EapMessage::response(identifier, self.variant.eap_type(), td.encode()).encode();

        let mac = compute_mac(&keys.k_aut, &unsigned, extra);

        let mut td = td;
        let last = td.attributes.len() - 1;
        td.attributes[last] = SimAkaAttribute::Mac(mac);
        Ok(self.respond(identifier, td))
    }

    fn process_identity(
        &mut self,
        message: &EapMessage,
        type_data: &SimAkaTypeData,
    ) -> Result<EapResult> {
        if !is_valid_identity_attributes(type_data) {
            return Ok(self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS));
        }

        let identity = self.prefixed_imsi()?;
        self.identity = identity.clone();
        self.transition(AkaState::Identity);

        Ok(self.respond(
            message.identifier,
            SimAkaTypeData::new(
                SimAkaSubtype::Identity,
                vec![SimAkaAttribute::Identity(identity)],
            ),
        ))
    }

    fn process_challenge(
        &mut self,
        message: &EapMessage,
        type_data: &SimAkaTypeData,
    ) -> Result<EapResult> {
        self.transition(AkaState::Challenge);

        if !type_data.has(AT_RAND) || !type_data.has(AT_AUTN) || !type_data.has(AT_MAC) {
            return Ok(self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS));
        }

        if let AkaVariant::AkaPrime {
            network_name,
            allow_mismatched_network_names,
        } = &self.variant
        {
            if !super::aka_prime::is_valid_challenge_attributes(
                type_data,
                network_name,
                *allow_mismatched_network_names,
            ) {
                return Ok(self.respond(
                    message.identifier,
                    SimAkaTypeData::new(SimAkaSubtype::AuthenticationReject, Vec::new()),
                ));
            }
        }

        let rand = match type_data.get(AT_RAND) {
            Some(SimAkaAttribute::Rand(rand)) if rand.len() == 16 => rand.clone(),
            _ => {
                return Ok(
                    self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                )
            }
        };
        let autn = match type_data.get(AT_AUTN) {
            Some(SimAkaAttribute::Autn(autn)) => *autn,
            _ => {
                return Ok(
                    self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                )
            }
        };

        // Card challenge: [RAND len | RAND | AUTN len | AUTN]
        let mut challenge = Vec::with_capacity(2 + rand.len() + autn.len());
        challenge.push(rand.len() as u8);
        challenge.extend_from_slice(&rand);
        challenge.push(autn.len() as u8);
        challenge.extend_from_slice(&autn);

        let card_response = self
            .authenticator
            .authenticate(AkaAppType::UmtsAka, &challenge)
            .map_err(|e| Error::AuthenticationFailed(format!("UICC failure: {}", e)))?;

        match parse_card_response(&card_response) {
            Ok(CardResult::SyncFailure { auts }) => {
                // Stay in Challenge: the server retries with a fresh AUTN.
                Ok(self.respond(
                    message.identifier,
                    SimAkaTypeData::new(
                        SimAkaSubtype::SynchronizationFailure,
                        vec![SimAkaAttribute::Auts(auts)],
                    ),
                ))
            }
            Ok(CardResult::Success { res, ik, ck }) => {
                let mk = aka_master_key(&self.identity, &ik, &ck);
                let keys = SimAkaKeys::derive(&mk)?;

                // Authenticate the server before answering: AT_MAC covers
                // the whole request with its MAC field zeroed.
                let zeroed = zero_mac_in_message(&message.encode())?;
                let expected = compute_mac(&keys.k_aut, &zeroed, b"");
                let received = match type_data.get(AT_MAC) {
                    Some(SimAkaAttribute::Mac(mac)) => *mac,
                    _ => {
                        return Ok(self
                            .client_error(message.identifier, client_error::UNABLE_TO_PROCESS))
                    }
                };
                if expected != received {
                    return Ok(
                        self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                    );
                }

                self.keys = Some(keys);
                self.had_successful_challenge = true;

                let response = self.respond_with_mac(
                    message.identifier,
                    SimAkaSubtype::Challenge,
                    vec![SimAkaAttribute::Res(res)],
                    b"",
                )?;
                Ok(response)
            }
            Err(e) => match e {
                Error::AuthenticationFailed(_) => Err(e),
                _ => Ok(self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)),
            },
        }
    }

    fn process_notification(
        &mut self,
        message: &EapMessage,
        type_data: &SimAkaTypeData,
    ) -> Result<EapResult> {
        // At most one notification per EAP session.
        if self.notification_handled {
            return Ok(self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS));
        }
        self.notification_handled = true;

        let code = match type_data.get(super::simaka::attribute::AT_NOTIFICATION) {
            Some(SimAkaAttribute::Notification(code)) => *code,
            _ => {
                return Ok(
                    self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                )
            }
        };

        if code & NOTIFICATION_PRE_CHALLENGE != 0 {
            // Pre-challenge notifications are unauthenticated.
            Ok(self.respond(
                message.identifier,
                SimAkaTypeData::new(SimAkaSubtype::Notification, Vec::new()),
            ))
        } else {
            // Post-challenge notifications must be MAC-protected.
            if self.keys.is_none() || !type_data.has(AT_MAC) {
                return Ok(
                    self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                );
            }
            let keys = self.keys.as_ref().expect("checked above");
            let zeroed = zero_mac_in_message(&message.encode())?;
            let expected = compute_mac(&keys.k_aut, &zeroed, b"");
            match type_data.get(AT_MAC) {
                Some(SimAkaAttribute::Mac(mac)) if *mac == expected => {}
                _ => {
                    return Ok(
                        self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                    )
                }
            }
            self.respond_with_mac(
                message.identifier,
                SimAkaSubtype::Notification,
                Vec::new(),
                b"",
            )
        }
    }
}

impl EapMethodStateMachine for EapAkaMachine {
    fn eap_type(&self) -> u8 {
        self.variant.eap_type()
    }

    fn identity(&mut self) -> Result<Vec<u8>> {
        let identity = self.prefixed_imsi()?;
        self.identity = identity.clone();
        Ok(identity)
    }

    fn process(&mut self, message: &EapMessage) -> Result<EapResult> {
        match message.code {
            EapCode::Success => {
                if self.state == AkaState::Challenge && self.had_successful_challenge {
                    self.transition(AkaState::Final);
                    let keys = self.keys.as_ref().expect("challenge succeeded");
                    logging::log_eap_success(self.variant.method_name());
                    return Ok(EapResult::Success {
                        msk: keys.msk.clone(),
                        emsk: keys.emsk.clone(),
                    });
                }
                Err(Error::AuthenticationFailed(
                    "Received EAP-Success before a successful challenge".to_string(),
                ))
            }
            EapCode::Failure => {
                self.transition(AkaState::Final);
                Ok(EapResult::Failure)
            }
            EapCode::Response => Err(Error::InvalidSyntax(
                "Server sent an EAP Response".to_string(),
            )),
            EapCode::Request => {
                let data = message.data.as_ref().ok_or_else(|| {
                    Error::InvalidSyntax("EAP request without type data".to_string())
                })?;
                if data.eap_type != self.eap_type() {
                    return Err(Error::InvalidSyntax(format!(
                        "Expected EAP type {}, received {}",
                        self.eap_type(),
                        data.eap_type
                    )));
                }

                let type_data = match SimAkaTypeData::decode(&data.type_data) {
                    Ok(td) => td,
                    Err(_) => {
                        return Ok(self
                            .client_error(message.identifier, client_error::UNABLE_TO_PROCESS))
                    }
                };

                match (self.state, type_data.subtype) {
                    (_, SimAkaSubtype::Notification) => {
                        self.process_notification(message, &type_data)
                    }
                    (AkaState::Created, SimAkaSubtype::Identity)
                    | (AkaState::Identity, SimAkaSubtype::Identity) => {
                        self.process_identity(message, &type_data)
                    }
                    (AkaState::Created, SimAkaSubtype::Challenge)
                    | (AkaState::Identity, SimAkaSubtype::Challenge)
                    | (AkaState::Challenge, SimAkaSubtype::Challenge) => {
                        self.process_challenge(message, &type_data)
                    }
                    (AkaState::Final, _) => Err(Error::InvalidState(
                        "EAP-AKA method already concluded".to_string(),
                    )),
                    _ => Ok(self
                        .client_error(message.identifier, client_error::UNABLE_TO_PROCESS)),
                }
            }
        }
    }
}

/// Exactly one identity-request attribute, and none of the protected-mode
/// attributes (RFC 4187 Section 9.2).
fn is_valid_identity_attributes(type_data: &SimAkaTypeData) -> bool {
    let id_requests = [AT_PERMANENT_ID_REQ, AT_ANY_ID_REQ, AT_FULLAUTH_ID_REQ]
        .iter()
        .filter(|&&t| type_data.has(t))
        .count();
    if id_requests != 1 {
        return false;
    }

    !(type_data.has(AT_MAC) || type_data.has(AT_IV) || type_data.has(AT_ENCR_DATA))
}

enum CardResult {
    Success {
        res: Vec<u8>,
        ik: [u8; IK_LEN],
        ck: [u8; CK_LEN],
    },
    SyncFailure {
        auts: [u8; super::simaka::AUTS_LEN],
    },
}

/// Parse the card response:
///
/// ```text
/// [0xDB | RES len | RES | IK len | IK | CK len | CK]    success
/// [0xDC | AUTS len | AUTS]                              sync failure
/// ```
fn parse_card_response(data: &[u8]) -> Result<CardResult> {
    let mut cursor = Cursor::new(data);
    let tag = cursor.take_byte()?;

    match tag {
        TAG_SUCCESS => {
            let res = cursor.take_len_prefixed()?;
            if res.len() < 4 || res.len() > 16 {
                return Err(Error::InvalidLength {
                    expected: 16,
                    actual: res.len(),
                });
            }
            let ik: [u8; IK_LEN] =
                cursor
                    .take_len_prefixed()?
                    .try_into()
                    .map_err(|v: Vec<u8>| Error::InvalidLength {
                        expected: IK_LEN,
                        actual: v.len(),
                    })?;
            let ck: [u8; CK_LEN] =
                cursor
                    .take_len_prefixed()?
                    .try_into()
                    .map_err(|v: Vec<u8>| Error::InvalidLength {
                        expected: CK_LEN,
                        actual: v.len(),
                    })?;
            Ok(CardResult::Success { res, ik, ck })
        }
        TAG_SYNC_FAILURE => {
            let auts: [u8; super::simaka::AUTS_LEN] = cursor
                .take_len_prefixed()?
                .try_into()
                .map_err(|v: Vec<u8>| Error::InvalidLength {
                    expected: super::simaka::AUTS_LEN,
                    actual: v.len(),
                })?;
            Ok(CardResult::SyncFailure { auts })
        }
        other => Err(Error::AuthenticationFailed(format!(
            "Invalid tag for UICC response: {:02X}",
            other
        ))),
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, offset: 0 }
    }

    fn take_byte(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.offset).ok_or(Error::BufferTooShort {
            required: self.offset + 1,
            available: self.data.len(),
        })?;
        self.offset += 1;
        Ok(byte)
    }

    fn take_len_prefixed(&mut self) -> Result<Vec<u8>> {
        let len = self.take_byte()? as usize;
        if self.data.len() < self.offset + len {
            return Err(Error::BufferTooShort {
                required: self.offset + len,
                available: self.data.len(),
            });
        }
        let out = self.data[self.offset..self.offset + len].to_vec();
        self.offset += len;
        Ok(out)
    }
}
