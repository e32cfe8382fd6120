//! EAP-SIM method state machine (RFC 4186)
//!
//! ```text
//! Created --> Start --> Challenge --> Final
//! ```
//!
//! The Start round negotiates the protocol version and delivers NONCE_MT;
//! the Challenge round runs the GSM algorithm on the card once per RAND
//! (2 or 3 of them) and derives the session keys from the Kc values.

use std::sync::Arc;

use ikepeer_platform::{AkaAppType, SimAuthenticator};
use rand::RngCore;

use super::crypto::{compute_mac, sim_master_key, SimAkaKeys};
use super::message::{EapCode, EapMessage, TYPE_SIM};
use super::simaka::attribute::{
    client_error, AT_ANY_ID_REQ, AT_FULLAUTH_ID_REQ, AT_MAC, AT_PERMANENT_ID_REQ, AT_RAND,
    AT_VERSION_LIST,
};
use super::simaka::{zero_mac_in_message, SimAkaAttribute, SimAkaSubtype, SimAkaTypeData};
use super::{EapMethodStateMachine, EapResult};
use crate::ike::logging;
use crate::ike::{Error, Result};

/// The protocol version this peer implements
const SUPPORTED_VERSION: u16 = 1;

/// GSM triplet lengths
const SRES_LEN: usize = 4;
const KC_LEN: usize = 8;

/// Method state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// No method message processed yet
    Created,
    /// SIM-Start round in progress
    Start,
    /// SIM-Challenge round in progress
    Challenge,
    /// Method concluded
    Final,
}

/// EAP-SIM peer state machine
pub struct EapSimMachine {
    authenticator: Arc<dyn SimAuthenticator>,
    state: SimState,
    identity: Vec<u8>,
    nonce_mt: [u8; 16],
    version_list_bytes: Vec<u8>,
    keys: Option<SimAkaKeys>,
    had_successful_challenge: bool,
    notification_handled: bool,
}

impl EapSimMachine {
    /// Create an EAP-SIM machine
    pub fn new(authenticator: Arc<dyn SimAuthenticator>) -> Self {
        let mut nonce_mt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce_mt);

        EapSimMachine {
            authenticator,
            state: SimState::Created,
            identity: Vec::new(),
            nonce_mt,
            version_list_bytes: Vec::new(),
            keys: None,
            had_successful_challenge: false,
            notification_handled: false,
        }
    }

    /// Current method state
    pub fn state(&self) -> SimState {
        self.state
    }

    fn transition(&mut self, next: SimState) {
        logging::log_eap_transition(
            "EAP-SIM",
            &format!("{:?}", self.state),
            &format!("{:?}", next),
        );
        self.state = next;
    }

    fn prefixed_imsi(&self) -> Result<Vec<u8>> {
        let imsi = self.authenticator.subscriber_id().ok_or_else(|| {
            Error::IdentityUnavailable("IMSI not available from the UICC".to_string())
        })?;
        // "1" marks the permanent identity (RFC 4186 Section 4.1.2.6)
        Ok(format!("1{}", imsi).into_bytes())
    }

    fn client_error(&self, identifier: u8, code: u16) -> EapResult {
        let td = SimAkaTypeData::new(
            SimAkaSubtype::ClientError,
            vec![SimAkaAttribute::ClientErrorCode(code)],
        );
        EapResult::Response(EapMessage::response(identifier, TYPE_SIM, td.encode()).encode())
    }

    fn respond(&self, identifier: u8, td: SimAkaTypeData) -> EapResult {
        EapResult::Response(EapMessage::response(identifier, TYPE_SIM, td.encode()).encode())
    }

    fn process_start(
        &mut self,
        message: &EapMessage,
        type_data: &SimAkaTypeData,
    ) -> Result<EapResult> {
        let versions = match type_data.get(AT_VERSION_LIST) {
            Some(SimAkaAttribute::VersionList(versions)) => versions.clone(),
            _ => {
                return Ok(
                    self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                )
            }
        };
        if !versions.contains(&SUPPORTED_VERSION) {
            return Ok(
                self.client_error(message.identifier, client_error::UNSUPPORTED_VERSION)
            );
        }

        let mut attributes = vec![
            SimAkaAttribute::NonceMt(self.nonce_mt),
            SimAkaAttribute::SelectedVersion(SUPPORTED_VERSION),
        ];

        // An identity request in SIM-Start gets the identity in the same
        // response.
        let id_requested = [AT_PERMANENT_ID_REQ, AT_ANY_ID_REQ, AT_FULLAUTH_ID_REQ]
            .iter()
            .any(|&t| type_data.has(t));
        if id_requested {
            let identity = self.prefixed_imsi()?;
            self.identity = identity.clone();
            attributes.push(SimAkaAttribute::Identity(identity));
        }

        self.version_list_bytes = versions
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        self.transition(SimState::Start);

        Ok(self.respond(
            message.identifier,
            SimAkaTypeData::new(SimAkaSubtype::Start, attributes),
        ))
    }

    fn process_challenge(
        &mut self,
        message: &EapMessage,
        type_data: &SimAkaTypeData,
    ) -> Result<EapResult> {
        if self.version_list_bytes.is_empty() {
            // Challenge before Start: the MK inputs are incomplete.
            return Ok(self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS));
        }
        self.transition(SimState::Challenge);

        if !type_data.has(AT_MAC) {
            return Ok(self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS));
        }

        let rands: Vec<[u8; 16]> = match type_data.get(AT_RAND) {
            Some(SimAkaAttribute::Rand(data)) => data
                .chunks_exact(16)
                .map(|c| c.try_into().expect("chunk size is 16"))
                .collect(),
            _ => {
                return Ok(
                    self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                )
            }
        };

        // 2 or 3 distinct RANDs required (RFC 4186 Section 10.9)
        if rands.len() < 2 || rands.len() > 3 {
            return Ok(self.client_error(
                message.identifier,
                client_error::INSUFFICIENT_CHALLENGES,
            ));
        }
        for i in 0..rands.len() {
            for j in i + 1..rands.len() {
                if rands[i] == rands[j] {
                    return Ok(
                        self.client_error(message.identifier, client_error::RAND_NOT_FRESH)
                    );
                }
            }
        }

        // Run the GSM algorithm once per RAND: [RAND len | RAND] in,
        // [SRES len | SRES | Kc len | Kc] out.
        let mut sres_all = Vec::with_capacity(rands.len() * SRES_LEN);
        let mut kc_all = Vec::with_capacity(rands.len() * KC_LEN);
        for rand in &rands {
            let mut challenge = Vec::with_capacity(1 + rand.len());
            challenge.push(rand.len() as u8);
            challenge.extend_from_slice(rand);

            let response = self
                .authenticator
                .authenticate(AkaAppType::GsmSim, &challenge)
                .map_err(|e| Error::AuthenticationFailed(format!("UICC failure: {}", e)))?;

            match parse_gsm_response(&response) {
                Ok((sres, kc)) => {
                    sres_all.extend_from_slice(&sres);
                    kc_all.extend_from_slice(&kc);
                }
                Err(_) => {
                    return Ok(self
                        .client_error(message.identifier, client_error::UNABLE_TO_PROCESS))
                }
            }
        }

        let mk = sim_master_key(
            &self.identity,
            &kc_all,
            &self.nonce_mt,
            &self.version_list_bytes,
            SUPPORTED_VERSION,
        );
        let keys = SimAkaKeys::derive(&mk)?;

        // Request MAC covers the message plus NONCE_MT (RFC 4186 Section 9.3).
        let zeroed = zero_mac_in_message(&message.encode())?;
        let expected = compute_mac(&keys.k_aut, &zeroed, &self.nonce_mt);
        match type_data.get(AT_MAC) {
            Some(SimAkaAttribute::Mac(mac)) if *mac == expected => {}
            _ => {
                return Ok(
                    self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS)
                )
            }
        }

        // Response MAC covers the response plus the concatenated SRES
        // values (RFC 4186 Section 9.4).
        let td = SimAkaTypeData::new(
            SimAkaSubtype::Challenge,
            vec![SimAkaAttribute::Mac([0u8; 16])],
        );
        let unsigned = EapMessage::response(message.identifier, TYPE_SIM, td.encode()).encode();
        let mac = compute_mac(&keys.k_aut, &unsigned, &sres_all);

        self.keys = Some(keys);
        self.had_successful_challenge = true;

        Ok(self.respond(
            message.identifier,
            SimAkaTypeData::new(
                SimAkaSubtype::Challenge,
                vec![SimAkaAttribute::Mac(mac)],
            ),
        ))
    }

    fn process_notification(
        &mut self,
        message: &EapMessage,
        type_data: &SimAkaTypeData,
    ) -> Result<EapResult> {
        if self.notification_handled {
            return Ok(self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS));
        }
        self.notification_handled = true;

        if !type_data.has(super::simaka::attribute::AT_NOTIFICATION) {
            return Ok(self.client_error(message.identifier, client_error::UNABLE_TO_PROCESS));
        }

        Ok(self.respond(
            message.identifier,
            SimAkaTypeData::new(SimAkaSubtype::Notification, Vec::new()),
        ))
    }
}

impl EapMethodStateMachine for EapSimMachine {
    fn eap_type(&self) -> u8 {
        TYPE_SIM
    }

    fn identity(&mut self) -> Result<Vec<u8>> {
        let identity = self.prefixed_imsi()?;
        self.identity = identity.clone();
        Ok(identity)
    }

    fn process(&mut self, message: &EapMessage) -> Result<EapResult> {
        match message.code {
            EapCode::Success => {
                if self.state == SimState::Challenge && self.had_successful_challenge {
                    self.transition(SimState::Final);
                    let keys = self.keys.as_ref().expect("challenge succeeded");
                    logging::log_eap_success("EAP-SIM");
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
                self.transition(SimState::Final);
                Ok(EapResult::Failure)
            }
            EapCode::Response => Err(Error::InvalidSyntax(
                "Server sent an EAP Response".to_string(),
            )),
            EapCode::Request => {
                let data = message.data.as_ref().ok_or_else(|| {
                    Error::InvalidSyntax("EAP request without type data".to_string())
                })?;
                if data.eap_type != TYPE_SIM {
                    return Err(Error::InvalidSyntax(format!(
                        "Expected EAP type {}, received {}",
                        TYPE_SIM, data.eap_type
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
                    (SimState::Created, SimAkaSubtype::Start)
                    | (SimState::Start, SimAkaSubtype::Start) => {
                        self.process_start(message, &type_data)
                    }
                    (SimState::Start, SimAkaSubtype::SimChallenge)
                    | (SimState::Challenge, SimAkaSubtype::SimChallenge) => {
                        self.process_challenge(message, &type_data)
                    }
                    (SimState::Final, _) => Err(Error::InvalidState(
                        "EAP-SIM method already concluded".to_string(),
                    )),
                    _ => Ok(self
                        .client_error(message.identifier, client_error::UNABLE_TO_PROCESS)),
                }
            }
        }
    }
}

/// Parse [SRES len | SRES | Kc len | Kc]
fn parse_gsm_response(data: &[u8]) -> Result<([u8; SRES_LEN], [u8; KC_LEN])> {
    let err = || Error::InvalidSyntax("Malformed GSM card response".to_string());

    let sres_len = *data.first().ok_or_else(err)? as usize;
    if sres_len != SRES_LEN || data.len() < 1 + sres_len + 1 {
        return Err(err());
    }
    let sres: [u8; SRES_LEN] = data[1..1 + SRES_LEN].try_into().map_err(|_| err())?;

    let kc_len = data[1 + SRES_LEN] as usize;
    if kc_len != KC_LEN || data.len() != 2 + SRES_LEN + KC_LEN {
        return Err(err());
    }
    let kc: [u8; KC_LEN] = data[2 + SRES_LEN..].try_into().map_err(|_| err())?;

    Ok((sres, kc))
}
