//! Wire protocol for `/ws/<session-id>`. Binary frames are decoded by hand
//! (the formats are a handful of fixed-layout bytes, not worth a codec
//! crate); JSON control messages use `serde_json`.

use serde::{Deserialize, Serialize};

/// First byte of a client -> server binary frame.
pub const FRAME_RESIZE: u8 = 0x00;
pub const FRAME_UPLOAD: u8 = 0x01;

/// Decoded `0x00 rh rl ch cl` resize frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeFrame {
    pub rows: u16,
    pub cols: u16,
}

/// Decoded `0x01 nh nl <name> <data>` file upload frame.
#[derive(Debug, Clone)]
pub struct UploadFrame {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub enum ClientFrame {
    Resize(ResizeFrame),
    Upload(UploadFrame),
    Keystrokes(Vec<u8>),
}

/// Parse an inbound binary WebSocket frame, dispatching on its first byte.
pub fn parse_binary_frame(bytes: &[u8]) -> ClientFrame {
    match bytes.first() {
        Some(&FRAME_RESIZE) if bytes.len() >= 5 => {
            let rows = u16::from_be_bytes([bytes[1], bytes[2]]);
            let cols = u16::from_be_bytes([bytes[3], bytes[4]]);
            ClientFrame::Resize(ResizeFrame { rows, cols })
        }
        Some(&FRAME_UPLOAD) if bytes.len() >= 3 => {
            let name_len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
            if bytes.len() >= 3 + name_len {
                let name = String::from_utf8_lossy(&bytes[3..3 + name_len]).into_owned();
                let data = bytes[3 + name_len..].to_vec();
                ClientFrame::Upload(UploadFrame { name, data })
            } else {
                ClientFrame::Keystrokes(bytes.to_vec())
            }
        }
        _ => ClientFrame::Keystrokes(bytes.to_vec()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientTextMessage {
    Ping { data: serde_json::Value },
    Chat { #[serde(rename = "userName")] user_name: String, text: String, timestamp: Option<u64> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerTextMessage<'a> {
    #[serde(rename = "pong")]
    Pong { data: serde_json::Value },
    #[serde(rename = "status")]
    Status { viewers: usize, cols: u16, rows: u16, assistant: &'a str },
    #[serde(rename = "file_upload")]
    FileUpload { success: bool, filename: &'a str, error: Option<&'a str> },
    #[serde(rename = "chat")]
    Chat { #[serde(rename = "userName")] user_name: &'a str, text: &'a str, timestamp: u64 },
    #[serde(rename = "processExited")]
    ProcessExited { code: u32 },
}

impl<'a> ServerTextMessage<'a> {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server text message always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resize_frame() {
        let bytes = [FRAME_RESIZE, 0, 24, 0, 80];
        match parse_binary_frame(&bytes) {
            ClientFrame::Resize(r) => assert_eq!((r.rows, r.cols), (24, 80)),
            _ => panic!("expected resize"),
        }
    }

    #[test]
    fn parses_upload_frame() {
        let name = b"notes.txt";
        let mut bytes = vec![FRAME_UPLOAD];
        bytes.extend_from_slice(&(name.len() as u16).to_be_bytes());
        bytes.extend_from_slice(name);
        bytes.extend_from_slice(b"hello");
        match parse_binary_frame(&bytes) {
            ClientFrame::Upload(u) => {
                assert_eq!(u.name, "notes.txt");
                assert_eq!(u.data, b"hello".to_vec());
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn other_bytes_are_keystrokes() {
        let bytes = [b'l', b's', b'\n'];
        match parse_binary_frame(&bytes) {
            ClientFrame::Keystrokes(data) => assert_eq!(data, bytes.to_vec()),
            _ => panic!("expected keystrokes"),
        }
    }

    #[test]
    fn parses_chat_text_message() {
        let json = r#"{"type":"chat","userName":"ada","text":"hi"}"#;
        let msg: ClientTextMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientTextMessage::Chat { user_name, text, .. } => {
                assert_eq!(user_name, "ada");
                assert_eq!(text, "hi");
            }
            _ => panic!("expected chat"),
        }
    }
}
