//! EAP peer authentication (RFC 3748)
//!
//! The IKE session drives one [`EapSession`] per IKE_AUTH negotiation: it
//! feeds each EAP request received inside SK{EAP} and sends back the bytes
//! of the produced response. The method state machines (EAP-SIM, EAP-AKA,
//! EAP-AKA', EAP-MSCHAPv2) export MSK/EMSK on success; the MSK keys the
//! final IKE AUTH payload.

pub mod aka;
pub mod aka_prime;
pub mod crypto;
pub mod message;
pub mod mschapv2;
pub mod sim;
pub mod simaka;

pub use message::{EapCode, EapMessage};

use crate::ike::config::EapMethodConfig;
use crate::ike::{Error, Result};

/// Result of processing one EAP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EapResult {
    /// Send this EAP response and await the next request
    Response(Vec<u8>),

    /// Authentication succeeded; session keys exported
    Success {
        /// Master Session Key (keys the IKE AUTH payload)
        msk: Vec<u8>,
        /// Extended Master Session Key
        emsk: Vec<u8>,
    },

    /// The server signalled EAP-Failure
    Failure,
}

/// One EAP method state machine, driven message by message.
pub trait EapMethodStateMachine: Send {
    /// The EAP method type this machine speaks
    fn eap_type(&self) -> u8;

    /// The identity to present in an EAP-Response/Identity
    fn identity(&mut self) -> Result<Vec<u8>>;

    /// Process one EAP message addressed to this method
    fn process(&mut self, message: &EapMessage) -> Result<EapResult>;
}

/// EAP session wrapper: handles Identity, Notification and Nak at the
/// session level and routes method messages into the state machine.
pub struct EapSession {
    method: Box<dyn EapMethodStateMachine>,
}

impl EapSession {
    /// Create a session for the configured method
    pub fn new(config: &EapMethodConfig) -> Self {
        let method: Box<dyn EapMethodStateMachine> = match config {
            EapMethodConfig::Aka { authenticator } => {
                Box::new(aka::EapAkaMachine::new(authenticator.clone()))
            }
            EapMethodConfig::AkaPrime {
                authenticator,
                network_name,
                allow_mismatched_network_names,
            } => Box::new(aka_prime::new_machine(
                authenticator.clone(),
                network_name.clone(),
                *allow_mismatched_network_names,
            )),
            EapMethodConfig::Sim { authenticator } => {
                Box::new(sim::EapSimMachine::new(authenticator.clone()))
            }
            EapMethodConfig::MsChapV2 { username, password } => Box::new(
                mschapv2::EapMsChapV2Machine::new(username.clone(), password.clone()),
            ),
        };
        EapSession { method }
    }

    /// Process one EAP message received from the server.
    pub fn process(&mut self, request: &[u8]) -> Result<EapResult> {
        let message = EapMessage::decode(request)?;

        match message.code {
            EapCode::Request => {
                let data = message.data.as_ref().ok_or_else(|| {
                    Error::InvalidSyntax("EAP request without type data".to_string())
                })?;

                match data.eap_type {
                    message::TYPE_IDENTITY => {
                        let identity = self.method.identity()?;
                        Ok(EapResult::Response(
                            EapMessage::identity_response(message.identifier, &identity)
                                .encode(),
                        ))
                    }
                    message::TYPE_NOTIFICATION => Ok(EapResult::Response(
                        EapMessage::response(
                            message.identifier,
                            message::TYPE_NOTIFICATION,
                            Vec::new(),
                        )
                        .encode(),
                    )),
                    t if t == self.method.eap_type() => self.method.process(&message),
                    _ => Ok(EapResult::Response(
                        EapMessage::nak_response(message.identifier, self.method.eap_type())
                            .encode(),
                    )),
                }
            }
            EapCode::Success | EapCode::Failure => self.method.process(&message),
            EapCode::Response => Err(Error::InvalidSyntax(
                "Received an EAP Response from the server".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ikepeer_platform::{AkaAppType, PlatformError, PlatformResult, SimAuthenticator};

    struct NoCard;

    impl SimAuthenticator for NoCard {
        fn subscriber_id(&self) -> Option<String> {
            None
        }

        fn authenticate(&self, _: AkaAppType, _: &[u8]) -> PlatformResult<Vec<u8>> {
            Err(PlatformError::Uicc("no card".into()))
        }
    }

    #[test]
    fn test_wrong_method_gets_nak() {
        let config = EapMethodConfig::Aka {
            authenticator: Arc::new(NoCard),
        };
        let mut session = EapSession::new(&config);

        // EAP-Request of type MSCHAPv2 while AKA is configured
        let request = EapMessage {
            code: EapCode::Request,
            identifier: 1,
            data: Some(message::EapData {
                eap_type: message::TYPE_MSCHAPV2,
                type_data: vec![],
            }),
        };

        let result = session.process(&request.encode()).unwrap();
        match result {
            EapResult::Response(bytes) => {
                let response = EapMessage::decode(&bytes).unwrap();
                let data = response.data.unwrap();
                assert_eq!(data.eap_type, message::TYPE_NAK);
                assert_eq!(data.type_data, vec![message::TYPE_AKA]);
            }
            other => panic!("Expected Nak response, got {:?}", other),
        }
    }

    #[test]
    fn test_identity_request_without_imsi_fails() {
        let config = EapMethodConfig::Aka {
            authenticator: Arc::new(NoCard),
        };
        let mut session = EapSession::new(&config);

        let request = EapMessage {
            code: EapCode::Request,
            identifier: 1,
            data: Some(message::EapData {
                eap_type: message::TYPE_IDENTITY,
                type_data: vec![],
            }),
        };

        let result = session.process(&request.encode());
        assert!(matches!(result, Err(Error::IdentityUnavailable(_))));
    }

    #[test]
    fn test_notification_request_gets_empty_response() {
        let config = EapMethodConfig::MsChapV2 {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let mut session = EapSession::new(&config);

        let request = EapMessage {
            code: EapCode::Request,
            identifier: 9,
            data: Some(message::EapData {
                eap_type: message::TYPE_NOTIFICATION,
                type_data: b"server says hi".to_vec(),
            }),
        };

        let result = session.process(&request.encode()).unwrap();
        match result {
            EapResult::Response(bytes) => {
                let response = EapMessage::decode(&bytes).unwrap();
                assert_eq!(response.identifier, 9);
                let data = response.data.unwrap();
                assert_eq!(data.eap_type, message::TYPE_NOTIFICATION);
                assert!(data.type_data.is_empty());
            }
            other => panic!("Expected notification response, got {:?}", other),
        }
    }
}
