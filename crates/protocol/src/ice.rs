use serde::{Deserialize, Serialize};

/// A serialized ICE candidate as carried through the signalling server.
///
/// Field names follow the JavaScript-style camelCase convention of the wire
/// format, which both peers must agree on regardless of their WebRTC stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateJson {
    pub component: u16,
    pub foundation: String,
    pub ip: String,
    pub port: u16,
    pub priority: u32,
    /// "udp" or "tcp"
    pub protocol: String,
    /// "host", "srflx", "prflx" or "relay"
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

impl IceCandidateJson {
    /// Rebuild the RFC 5245 `candidate:` attribute line these fields were
    /// parsed from, suitable for handing back to a WebRTC implementation.
    pub fn to_attribute(&self) -> String {
        let mut attr = format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.ip,
            self.port,
            self.typ,
        );
        if let (Some(addr), Some(port)) = (&self.related_address, self.related_port) {
            attr.push_str(&format!(" raddr {addr} rport {port}"));
        }
        if let Some(tcp_type) = &self.tcp_type {
            attr.push_str(&format!(" tcptype {tcp_type}"));
        }
        attr
    }
}
