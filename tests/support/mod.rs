#![allow(dead_code)]

pub mod socket_guard;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use wiremock::{Request, Respond, ResponseTemplate};

/// A 1x1 PNG.
pub const PNG_DATA_URI: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// PNG signature followed by `len - 8` filler bytes.
pub fn png_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.resize(len.max(8), 0);
    bytes
}

/// Responder that records when each request arrived and plays back a script
/// of responses, repeating the last one.
#[derive(Clone)]
pub struct RecordingResponder {
    arrivals: Arc<Mutex<Vec<Instant>>>,
    script: Arc<Vec<ResponseTemplate>>,
}

impl RecordingResponder {
    pub fn new(script: Vec<ResponseTemplate>) -> Self {
        assert!(!script.is_empty(), "responder needs at least one response");
        Self {
            arrivals: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(script),
        }
    }

    pub fn arrivals(&self) -> Vec<Instant> {
        self.arrivals.lock().unwrap().clone()
    }
}

impl Respond for RecordingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let mut arrivals = self.arrivals.lock().unwrap();
        arrivals.push(Instant::now());
        let step = (arrivals.len() - 1).min(self.script.len() - 1);
        self.script[step].clone()
    }
}
