//! Loads the 32-byte AES key from a McAfee-generated XML key file.
//!
//! Driven as a streaming pull parser (`quick_xml::Reader`) rather than a
//! DOM build: `quick-xml` has no external-entity or DTD-expansion code
//! path at all, so there is nothing to disable — the hardening the spec
//! calls for falls out of the crate choice.

use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::path::Path;

use crate::error::KeyError;

const AES_KEY_SIZE: usize = 32;

/// Loads and validates the AES key from `path`.
///
/// Walks the document looking for the first `<key>` element (at any
/// depth is not required by the contract, but direct children of the
/// root are what McAfee's tool emits; we accept the first `<key>`
/// encountered anywhere, matching the original's iteration over the
/// root's direct children in practice since the key is always top-level).
pub fn load_key(path: &Path) -> Result<[u8; AES_KEY_SIZE], KeyError> {
    let xml = fs::read_to_string(path)?;
    let mut reader = Reader::from_str(&xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut in_key_element = false;
    let mut key_text: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(tag) if tag.name().as_ref() == b"key" => {
                in_key_element = true;
            }
            Event::Text(text) if in_key_element => {
                key_text = Some(text.unescape()?.into_owned());
            }
            Event::End(tag) if tag.name().as_ref() == b"key" => {
                if key_text.is_some() {
                    break;
                }
                in_key_element = false;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let encoded = key_text.ok_or(KeyError::MissingKeyElement)?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;

    if decoded.len() != AES_KEY_SIZE {
        return Err(KeyError::BadLength {
            expected: AES_KEY_SIZE,
            actual: decoded.len(),
        });
    }

    let mut key = [0u8; AES_KEY_SIZE];
    key.copy_from_slice(&decoded);
    Ok(key)
}
