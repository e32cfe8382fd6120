//! EAP-MSCHAPv2 method state machine (RFC 2759 carried in EAP)
//!
//! ```text
//! Created --> ChallengeResponded --> SuccessResponded --> Final
//! ```
//!
//! The peer answers the server challenge with an NT-Response, verifies the
//! server's authenticator response from the Success Request, and exports
//! the MPPE-derived MSK (RFC 3079).

use md4::{Digest, Md4};
use rand::RngCore;
use sha1::Sha1;

use cipher::{BlockEncrypt, KeyInit};
use des::Des;

use super::message::{EapCode, EapMessage, TYPE_MSCHAPV2};
use super::{EapMethodStateMachine, EapResult};
use crate::ike::logging;
use crate::ike::{Error, Result};

/// MSCHAPv2 opcodes
const OP_CHALLENGE: u8 = 1;
const OP_RESPONSE: u8 = 2;
const OP_SUCCESS: u8 = 3;
const OP_FAILURE: u8 = 4;

const CHALLENGE_LEN: usize = 16;
const NT_RESPONSE_LEN: usize = 24;

/// Exported key lengths
const MSK_LEN: usize = 64;
const EMSK_LEN: usize = 64;

const MAGIC1: &[u8] = b"Magic server to client signing constant";
const MAGIC2: &[u8] = b"Pad to make it do more than one iteration";

const MPPE_MASTER_KEY_MAGIC: &[u8] = b"This is the MPPE Master Key";
const MPPE_SEND_KEY_MAGIC: &[u8] =
    b"On the client side, this is the send key; on the server side, it is the receive key.";
const MPPE_RECV_KEY_MAGIC: &[u8] =
    b"On the client side, this is the receive key; on the server side, it is the send key.";

const SHS_PAD1: [u8; 40] = [0x00; 40];
const SHS_PAD2: [u8; 40] = [0xF2; 40];

/// Method state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsChapV2State {
    /// No method message processed yet
    Created,
    /// NT-Response sent, awaiting Success/Failure Request
    ChallengeResponded,
    /// Authenticator response verified, awaiting EAP-Success
    SuccessResponded,
    /// Method concluded
    Final,
}

/// EAP-MSCHAPv2 peer state machine
pub struct EapMsChapV2Machine {
    username: String,
    password: String,
    state: MsChapV2State,
    auth_challenge: [u8; CHALLENGE_LEN],
    peer_challenge: [u8; CHALLENGE_LEN],
    nt_response: [u8; NT_RESPONSE_LEN],
    msk: Option<Vec<u8>>,
}

impl EapMsChapV2Machine {
    /// Create a machine for the given credentials
    pub fn new(username: String, password: String) -> Self {
        EapMsChapV2Machine {
            username,
            password,
            state: MsChapV2State::Created,
            auth_challenge: [0u8; CHALLENGE_LEN],
            peer_challenge: [0u8; CHALLENGE_LEN],
            nt_response: [0u8; NT_RESPONSE_LEN],
            msk: None,
        }
    }

    /// Current method state
    pub fn state(&self) -> MsChapV2State {
        self.state
    }

    fn transition(&mut self, next: MsChapV2State) {
        logging::log_eap_transition(
            "EAP-MSCHAPv2",
            &format!("{:?}", self.state),
            &format!("{:?}", next),
        );
        self.state = next;
    }

    fn respond(&self, identifier: u8, packet: Vec<u8>) -> EapResult {
        EapResult::Response(EapMessage::response(identifier, TYPE_MSCHAPV2, packet).encode())
    }

    fn process_challenge(&mut self, message: &EapMessage, packet: &[u8]) -> Result<EapResult> {
        // | opcode (1) | id (1) | length (2) | value-size (1) | challenge | name |
        if packet.len() < 5 + CHALLENGE_LEN || packet[4] as usize != CHALLENGE_LEN {
            return Err(Error::InvalidSyntax(
                "Malformed MSCHAPv2 Challenge packet".to_string(),
            ));
        }
        let ms_id = packet[1];
        self.auth_challenge
            .copy_from_slice(&packet[5..5 + CHALLENGE_LEN]);

        rand::thread_rng().fill_bytes(&mut self.peer_challenge);

        self.nt_response = generate_nt_response(
            &self.auth_challenge,
            &self.peer_challenge,
            self.username.as_bytes(),
            &self.password,
        );

        // Response packet:
        // | opcode | id | length | value-size (49) | peer-challenge (16) |
        // | reserved (8) | nt-response (24) | flags (1) | name |
        let value = {
            let mut v = Vec::with_capacity(49);
            v.extend_from_slice(&self.peer_challenge);
            v.extend_from_slice(&[0u8; 8]);
            v.extend_from_slice(&self.nt_response);
            v.push(0);
            v
        };
        let ms_length = (4 + 1 + value.len() + self.username.len()) as u16;

        let mut packet = Vec::with_capacity(ms_length as usize);
        packet.push(OP_RESPONSE);
        packet.push(ms_id);
        packet.extend_from_slice(&ms_length.to_be_bytes());
        packet.push(value.len() as u8);
        packet.extend_from_slice(&value);
        packet.extend_from_slice(self.username.as_bytes());

        self.transition(MsChapV2State::ChallengeResponded);
        Ok(self.respond(message.identifier, packet))
    }

    fn process_success_request(
        &mut self,
        message: &EapMessage,
        packet: &[u8],
    ) -> Result<EapResult> {
        // | opcode (1) | id (1) | length (2) | "S=<40 hex>[ M=<message>]" |
        if packet.len() < 4 {
            return Err(Error::InvalidSyntax(
                "Malformed MSCHAPv2 Success Request".to_string(),
            ));
        }
        let text = std::str::from_utf8(&packet[4..]).map_err(|_| {
            Error::InvalidSyntax("MSCHAPv2 Success Request is not UTF-8".to_string())
        })?;

        let auth_string = text
            .split(' ')
            .find_map(|field| field.strip_prefix("S="))
            .ok_or_else(|| {
                Error::InvalidSyntax("Success Request missing the S= field".to_string())
            })?;

        let expected = generate_authenticator_response(
            &self.password,
            &self.nt_response,
            &self.peer_challenge,
            &self.auth_challenge,
            self.username.as_bytes(),
        );

        if !auth_string.eq_ignore_ascii_case(&expected) {
            return Err(Error::AuthenticationFailed(
                "MSCHAPv2 authenticator response mismatch".to_string(),
            ));
        }

        self.msk = Some(derive_msk(&self.password, &self.nt_response));
        self.transition(MsChapV2State::SuccessResponded);

        // Success Response is the bare opcode.
        Ok(self.respond(message.identifier, vec![OP_SUCCESS]))
    }

    fn process_failure_request(&mut self, message: &EapMessage) -> Result<EapResult> {
        // The failure text (E=/R=/C=/V=/M=) is advisory; acknowledge and
        // wait for the EAP-Failure.
        Ok(self.respond(message.identifier, vec![OP_FAILURE]))
    }
}

impl EapMethodStateMachine for EapMsChapV2Machine {
    fn eap_type(&self) -> u8 {
        TYPE_MSCHAPV2
    }

    fn identity(&mut self) -> Result<Vec<u8>> {
        Ok(self.username.as_bytes().to_vec())
    }

    fn process(&mut self, message: &EapMessage) -> Result<EapResult> {
        match message.code {
            EapCode::Success => {
                if self.state == MsChapV2State::SuccessResponded {
                    self.transition(MsChapV2State::Final);
                    let msk = self.msk.clone().expect("authenticator verified");
                    logging::log_eap_success("EAP-MSCHAPv2");
                    return Ok(EapResult::Success {
                        msk,
                        emsk: vec![0u8; EMSK_LEN],
                    });
                }
                Err(Error::AuthenticationFailed(
                    "Received EAP-Success before the authenticator was verified".to_string(),
                ))
            }
            EapCode::Failure => {
                self.transition(MsChapV2State::Final);
                Ok(EapResult::Failure)
            }
            EapCode::Response => Err(Error::InvalidSyntax(
                "Server sent an EAP Response".to_string(),
            )),
            EapCode::Request => {
                let data = message.data.as_ref().ok_or_else(|| {
                    Error::InvalidSyntax("EAP request without type data".to_string())
                })?;
                if data.eap_type != TYPE_MSCHAPV2 {
                    return Err(Error::InvalidSyntax(format!(
                        "Expected EAP type {}, received {}",
                        TYPE_MSCHAPV2, data.eap_type
                    )));
                }
                let packet = &data.type_data;
                let opcode = *packet.first().ok_or_else(|| {
                    Error::InvalidSyntax("Empty MSCHAPv2 packet".to_string())
                })?;

                match (self.state, opcode) {
                    (MsChapV2State::Created, OP_CHALLENGE) => {
                        self.process_challenge(message, packet)
                    }
                    (MsChapV2State::ChallengeResponded, OP_SUCCESS) => {
                        self.process_success_request(message, packet)
                    }
                    (MsChapV2State::ChallengeResponded, OP_FAILURE) => {
                        self.process_failure_request(message)
                    }
                    (MsChapV2State::Final, _) => Err(Error::InvalidState(
                        "EAP-MSCHAPv2 method already concluded".to_string(),
                    )),
                    (state, opcode) => Err(Error::InvalidState(format!(
                        "Unexpected MSCHAPv2 opcode {} in state {:?}",
                        opcode, state
                    ))),
                }
            }
        }
    }
}

/// NtPasswordHash (RFC 2759 Section 8.3): MD4 over the UTF-16LE password.
fn nt_password_hash(password: &str) -> [u8; 16] {
    let mut md4 = Md4::new();
    for unit in password.encode_utf16() {
        md4.update(unit.to_le_bytes());
    }
    md4.finalize().into()
}

/// ChallengeHash (RFC 2759 Section 8.2)
fn challenge_hash(
    peer_challenge: &[u8; CHALLENGE_LEN],
    auth_challenge: &[u8; CHALLENGE_LEN],
    username: &[u8],
) -> [u8; 8] {
    let mut sha1 = Sha1::new();
    sha1.update(peer_challenge);
    sha1.update(auth_challenge);
    sha1.update(username);
    let digest = sha1.finalize();

    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Expand a 7-byte key into the 8-byte DES form: 7 key bits per byte, the
/// low bit left as parity (ignored by DES).
fn expand_des_key(key7: &[u8]) -> [u8; 8] {
    [
        key7[0] & 0xFE,
        (key7[0] << 7) | (key7[1] >> 1),
        (key7[1] << 6) | (key7[2] >> 2),
        (key7[2] << 5) | (key7[3] >> 3),
        (key7[3] << 4) | (key7[4] >> 4),
        (key7[4] << 3) | (key7[5] >> 5),
        (key7[5] << 2) | (key7[6] >> 6),
        key7[6] << 1,
    ]
}

/// ChallengeResponse (RFC 2759 Section 8.5): three DES encryptions of the
/// 8-byte challenge under the zero-padded password hash.
fn challenge_response(challenge8: &[u8; 8], password_hash: &[u8; 16]) -> [u8; NT_RESPONSE_LEN] {
    let mut z_password_hash = [0u8; 21];
    z_password_hash[..16].copy_from_slice(password_hash);

    let mut out = [0u8; NT_RESPONSE_LEN];
    for i in 0..3 {
        let key = expand_des_key(&z_password_hash[i * 7..i * 7 + 7]);
        let des = Des::new_from_slice(&key).expect("DES key is 8 bytes");

        let mut block = (*challenge8).into();
        des.encrypt_block(&mut block);
        out[i * 8..i * 8 + 8].copy_from_slice(&block);
    }
    out
}

/// GenerateNTResponse (RFC 2759 Section 8.1)
fn generate_nt_response(
    auth_challenge: &[u8; CHALLENGE_LEN],
    peer_challenge: &[u8; CHALLENGE_LEN],
    username: &[u8],
    password: &str,
) -> [u8; NT_RESPONSE_LEN] {
    let challenge = challenge_hash(peer_challenge, auth_challenge, username);
    let password_hash = nt_password_hash(password);
    challenge_response(&challenge, &password_hash)
}

/// GenerateAuthenticatorResponse (RFC 2759 Section 8.7), without the "S="
/// prefix; 40 uppercase hex characters.
fn generate_authenticator_response(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LEN],
    peer_challenge: &[u8; CHALLENGE_LEN],
    auth_challenge: &[u8; CHALLENGE_LEN],
    username: &[u8],
) -> String {
    let password_hash_hash: [u8; 16] =
        Md4::digest(nt_password_hash(password)).into();

    let mut sha1 = Sha1::new();
    sha1.update(password_hash_hash);
    sha1.update(nt_response);
    sha1.update(MAGIC1);
    let digest = sha1.finalize();

    let challenge = challenge_hash(peer_challenge, auth_challenge, username);

    let mut sha1 = Sha1::new();
    sha1.update(digest);
    sha1.update(challenge);
    sha1.update(MAGIC2);
    let response = sha1.finalize();

    hex::encode_upper(response)
}

/// MSK derivation (RFC 3079 Section 3): MasterReceiveKey ‖ MasterSendKey ‖
/// 32 zero octets.
fn derive_msk(password: &str, nt_response: &[u8; NT_RESPONSE_LEN]) -> Vec<u8> {
    let password_hash_hash: [u8; 16] =
        Md4::digest(nt_password_hash(password)).into();

    let mut sha1 = Sha1::new();
    sha1.update(password_hash_hash);
    sha1.update(nt_response);
    sha1.update(MPPE_MASTER_KEY_MAGIC);
    let master = sha1.finalize();

    let asymmetric_key = |magic: &[u8]| -> [u8; 16] {
        let mut sha1 = Sha1::new();
        sha1.update(&master[..16]);
        sha1.update(SHS_PAD1);
        sha1.update(magic);
        sha1.update(SHS_PAD2);
        let digest = sha1.finalize();
        digest[..16].try_into().expect("SHA1 digest is 20 bytes")
    };

    let receive_key = asymmetric_key(MPPE_RECV_KEY_MAGIC);
    let send_key = asymmetric_key(MPPE_SEND_KEY_MAGIC);

    let mut msk = Vec::with_capacity(MSK_LEN);
    msk.extend_from_slice(&receive_key);
    msk.extend_from_slice(&send_key);
    msk.resize(MSK_LEN, 0);
    msk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eap::message::EapData;

    // RFC 2759 Section 9.2 test vectors
    const USERNAME: &[u8] = b"User";
    const PASSWORD: &str = "clientPass";
    const AUTH_CHALLENGE: [u8; 16] = [
        0x5B, 0x5D, 0x7C, 0x7D, 0x7B, 0x3F, 0x2F, 0x3E, 0x3C, 0x2C, 0x60, 0x21, 0x32, 0x26,
        0x26, 0x28,
    ];
    const PEER_CHALLENGE: [u8; 16] = [
        0x21, 0x40, 0x23, 0x24, 0x25, 0x5E, 0x26, 0x2A, 0x28, 0x29, 0x5F, 0x2B, 0x3A, 0x33,
        0x7C, 0x7E,
    ];

    #[test]
    fn test_nt_password_hash_vector() {
        assert_eq!(
            hex::encode(nt_password_hash(PASSWORD)),
            "44ebba8d5312b8d611474411f56989ae"
        );
    }

    #[test]
    fn test_challenge_hash_vector() {
        let challenge = challenge_hash(&PEER_CHALLENGE, &AUTH_CHALLENGE, USERNAME);
        assert_eq!(hex::encode(challenge), "d02e4386bce91226");
    }

    #[test]
    fn test_nt_response_vector() {
        let response =
            generate_nt_response(&AUTH_CHALLENGE, &PEER_CHALLENGE, USERNAME, PASSWORD);
        assert_eq!(
            hex::encode(response),
            "82309ecd8d708b5ea08faa3981cd83544233114a3d85d6df"
        );
    }

    #[test]
    fn test_authenticator_response_vector() {
        let nt_response =
            generate_nt_response(&AUTH_CHALLENGE, &PEER_CHALLENGE, USERNAME, PASSWORD);
        let auth_response = generate_authenticator_response(
            PASSWORD,
            &nt_response,
            &PEER_CHALLENGE,
            &AUTH_CHALLENGE,
            USERNAME,
        );
        assert_eq!(auth_response, "407A5589115FD0D6209F510FE9C04566932CDA56");
    }

    fn challenge_packet(ms_id: u8) -> Vec<u8> {
        let name = b"authenticator";
        let ms_length = (5 + CHALLENGE_LEN + name.len()) as u16;

        let mut packet = vec![OP_CHALLENGE, ms_id];
        packet.extend_from_slice(&ms_length.to_be_bytes());
        packet.push(CHALLENGE_LEN as u8);
        packet.extend_from_slice(&AUTH_CHALLENGE);
        packet.extend_from_slice(name);
        packet
    }

    fn request(identifier: u8, packet: Vec<u8>) -> EapMessage {
        EapMessage {
            code: EapCode::Request,
            identifier,
            data: Some(EapData {
                eap_type: TYPE_MSCHAPV2,
                type_data: packet,
            }),
        }
    }

    fn machine() -> EapMsChapV2Machine {
        EapMsChapV2Machine::new(
            String::from_utf8(USERNAME.to_vec()).unwrap(),
            PASSWORD.to_string(),
        )
    }

    #[test]
    fn test_challenge_round() {
        let mut machine = machine();
        let result = machine.process(&request(1, challenge_packet(7))).unwrap();

        let bytes = match result {
            EapResult::Response(bytes) => bytes,
            other => panic!("Expected response, got {:?}", other),
        };
        let response = EapMessage::decode(&bytes).unwrap();
        let packet = response.data.unwrap().type_data;

        assert_eq!(packet[0], OP_RESPONSE);
        assert_eq!(packet[1], 7); // echoes the MS-CHAPv2 id
        assert_eq!(packet[4], 49); // value-size
        assert_eq!(&packet[53 + 1..], USERNAME);
        assert_eq!(machine.state(), MsChapV2State::ChallengeResponded);
    }

    #[test]
    fn test_full_authentication() {
        let mut machine = machine();
        machine.process(&request(1, challenge_packet(7))).unwrap();

        // The server validates the NT-Response and sends its authenticator
        // response; rebuild it from the machine's recorded challenges.
        let auth_response = generate_authenticator_response(
            PASSWORD,
            &machine.nt_response,
            &machine.peer_challenge,
            &machine.auth_challenge,
            USERNAME,
        );
        let text = format!("S={} M=Welcome", auth_response);
        let ms_length = (4 + text.len()) as u16;
        let mut packet = vec![OP_SUCCESS, 7];
        packet.extend_from_slice(&ms_length.to_be_bytes());
        packet.extend_from_slice(text.as_bytes());

        let result = machine.process(&request(2, packet)).unwrap();
        match result {
            EapResult::Response(bytes) => {
                let response = EapMessage::decode(&bytes).unwrap();
                assert_eq!(response.data.unwrap().type_data, vec![OP_SUCCESS]);
            }
            other => panic!("Expected success response, got {:?}", other),
        }
        assert_eq!(machine.state(), MsChapV2State::SuccessResponded);

        let success = EapMessage {
            code: EapCode::Success,
            identifier: 3,
            data: None,
        };
        match machine.process(&success).unwrap() {
            EapResult::Success { msk, emsk } => {
                assert_eq!(msk.len(), MSK_LEN);
                assert_eq!(emsk.len(), EMSK_LEN);
                assert_ne!(msk, vec![0u8; MSK_LEN]);
            }
            other => panic!("Expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_authenticator_response_is_fatal() {
        let mut machine = machine();
        machine.process(&request(1, challenge_packet(7))).unwrap();

        let text = format!("S={} M=Welcome", "0".repeat(40));
        let ms_length = (4 + text.len()) as u16;
        let mut packet = vec![OP_SUCCESS, 7];
        packet.extend_from_slice(&ms_length.to_be_bytes());
        packet.extend_from_slice(text.as_bytes());

        let result = machine.process(&request(2, packet));
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    }

    #[test]
    fn test_premature_success_is_fatal() {
        let mut machine = machine();
        let success = EapMessage {
            code: EapCode::Success,
            identifier: 1,
            data: None,
        };
        assert!(matches!(
            machine.process(&success),
            Err(Error::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_failure_request_acknowledged() {
        let mut machine = machine();
        machine.process(&request(1, challenge_packet(7))).unwrap();

        let text = b"E=691 R=0 C=00112233445566778899aabbccddeeff V=3 M=denied";
        let ms_length = (4 + text.len()) as u16;
        let mut packet = vec![OP_FAILURE, 7];
        packet.extend_from_slice(&ms_length.to_be_bytes());
        packet.extend_from_slice(text);

        let result = machine.process(&request(2, packet)).unwrap();
        match result {
            EapResult::Response(bytes) => {
                let response = EapMessage::decode(&bytes).unwrap();
                assert_eq!(response.data.unwrap().type_data, vec![OP_FAILURE]);
            }
            other => panic!("Expected failure response, got {:?}", other),
        }

        // The EAP-Failure then concludes the method.
        let failure = EapMessage {
            code: EapCode::Failure,
            identifier: 3,
            data: None,
        };
        assert_eq!(machine.process(&failure).unwrap(), EapResult::Failure);
    }

    #[test]
    fn test_malformed_challenge_rejected() {
        let mut machine = machine();
        let packet = vec![OP_CHALLENGE, 7, 0, 10, 8]; // value-size 8, no challenge
        let result = machine.process(&request(1, packet));
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }
}
