use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a meeting participant.
///
/// Assigned by the roster service of the surrounding application; the media
/// core only requires it to be unique within a meeting room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Role a participant holds in the meeting roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Host,
    Member,
    Observer,
}

/// Signaling messages relayed between participants of a meeting room.
///
/// `peer_id` is the *target* on outbound messages and the *sender* on inbound
/// messages; the relay rewrites it in transit. Roster messages
/// (`peer_joined`/`peer_left`) are inbound only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// WebRTC SDP offer
    Offer { peer_id: PeerId, sdp: String },
    /// WebRTC SDP answer
    Answer { peer_id: PeerId, sdp: String },
    /// Trickle ICE candidate exchange
    IceCandidate {
        peer_id: PeerId,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },
    /// A participant joined the room
    PeerJoined {
        peer_id: PeerId,
        display_name: String,
        role: ParticipantRole,
    },
    /// A participant left the room
    PeerLeft { peer_id: PeerId },
}

impl SignalMessage {
    /// Peer id carried by any variant.
    pub fn peer_id(&self) -> &PeerId {
        match self {
            SignalMessage::Offer { peer_id, .. }
            | SignalMessage::Answer { peer_id, .. }
            | SignalMessage::IceCandidate { peer_id, .. }
            | SignalMessage::PeerJoined { peer_id, .. }
            | SignalMessage::PeerLeft { peer_id } => peer_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_roundtrip() {
        let msg = SignalMessage::Offer {
            peer_id: PeerId::from("emp-42"),
            sdp: "v=0\r\n...".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"offer""#));
        let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            SignalMessage::Offer { peer_id, sdp } => {
                assert_eq!(peer_id.as_str(), "emp-42");
                assert_eq!(sdp, "v=0\r\n...");
            }
            _ => panic!("Expected Offer"),
        }
    }

    #[test]
    fn answer_roundtrip() {
        let msg = SignalMessage::Answer {
            peer_id: PeerId::from("emp-7"),
            sdp: "v=0\r\nanswer".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"answer""#));
        let _: SignalMessage = serde_json::from_str(&json).unwrap();
    }

    #[test]
    fn ice_candidate_snake_case() {
        let msg = SignalMessage::IceCandidate {
            peer_id: PeerId::from("emp-7"),
            candidate: "candidate:1 1 UDP 2130706431 ...".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let json = serde_json::to_string(&msg).unwrap();
        // Must be snake_case, NOT kebab-case
        assert!(json.contains(r#""type":"ice_candidate""#));
        assert!(!json.contains("ice-candidate"));

        let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            SignalMessage::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
                ..
            } => {
                assert!(candidate.starts_with("candidate:"));
                assert_eq!(sdp_mid, Some("0".to_string()));
                assert_eq!(sdp_mline_index, Some(0));
            }
            _ => panic!("Expected IceCandidate"),
        }
    }

    #[test]
    fn peer_joined_from_relay_format() {
        let json = r#"{
            "type": "peer_joined",
            "peer_id": "emp-301",
            "display_name": "Dana",
            "role": "member"
        }"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        match msg {
            SignalMessage::PeerJoined {
                peer_id,
                display_name,
                role,
            } => {
                assert_eq!(peer_id.as_str(), "emp-301");
                assert_eq!(display_name, "Dana");
                assert_eq!(role, ParticipantRole::Member);
            }
            _ => panic!("Expected PeerJoined"),
        }
    }

    #[test]
    fn peer_left_roundtrip() {
        let msg = SignalMessage::PeerLeft {
            peer_id: PeerId::from("emp-301"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"peer_left""#));
        let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.peer_id().as_str(), "emp-301");
    }

    #[test]
    fn peer_id_is_transparent_in_json() {
        let id = PeerId::from("emp-9");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""emp-9""#);
    }

    #[test]
    fn role_tags_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&ParticipantRole::Host).unwrap(),
            r#""host""#
        );
        assert_eq!(
            serde_json::to_string(&ParticipantRole::Observer).unwrap(),
            r#""observer""#
        );
    }
}
