//! Native-messaging bridge.
//!
//! The browser extension forwards what it observes on the host page as
//! [`HostCommand`] frames; captured actions go back the same way. Each frame
//! is a native-endian `u32` length followed by that many bytes of JSON.

use crate::dom::{EventKind, Page};
use crate::trackers::TrackerStatsSnapshot;
use crate::types::{CaptureError, CapturedAction};
use ego_tree::NodeId;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use tracing::{debug, trace};

/// Upper bound for a single incoming frame
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Read one frame. `Ok(None)` means the other side closed the pipe.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut length_bytes = [0u8; 4];

    match reader.read_exact(&mut length_bytes) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let length = u32::from_ne_bytes(length_bytes) as usize;
    if length == 0 {
        return Ok(None);
    }
    if length > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", length),
        ));
    }

    let mut message = vec![0u8; length];
    reader.read_exact(&mut message)?;

    Ok(Some(message))
}

pub fn write_frame<W: Write>(writer: &mut W, message: &[u8]) -> io::Result<()> {
    let length = u32::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;

    writer.write_all(&length.to_ne_bytes())?;
    writer.write_all(message)?;
    writer.flush()
}

/// Page events relayed by the extension.
///
/// Nodes are addressed by CSS selector; the first match wins.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    /// A full document, on first load or after a hard navigation
    Load { url: String, html: String },
    Insert { parent: String, html: String },
    Remove { target: String },
    SetText { target: String, text: String },
    Click { target: String },
    Submit { target: String },
    Intersect {
        target: String,
        #[serde(default = "visible_default")]
        visible: bool,
    },
    Visibility { visible: bool },
    /// History navigation without a document reload
    Navigate { url: String },
    Unload,
}

fn visible_default() -> bool {
    true
}

/// Frames written back to the extension
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Captured { action: CapturedAction },
    Error { message: String },
    Stats { trackers: Vec<TrackerStatsSnapshot> },
}

impl OutgoingMessage {
    pub fn to_frame(&self) -> Result<Vec<u8>, CaptureError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// What the caller should do after a command was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Continue,
    Unload,
}

pub fn parse_command(frame: &[u8]) -> Result<HostCommand, CaptureError> {
    Ok(serde_json::from_slice(frame)?)
}

/// Apply a command to the page
pub fn apply_command(page: &Page, command: HostCommand) -> Result<Applied, CaptureError> {
    trace!("Host command: {:?}", command);
    match command {
        HostCommand::Load { url, html } => {
            debug!("Loading document for {} ({} bytes)", url, html.len());
            page.replace_document(&url, &html);
        }
        HostCommand::Insert { parent, html } => {
            let parent = resolve(page, &parent)?;
            let added = page.insert_html(parent, &html);
            debug!("Inserted {} nodes", added.len());
        }
        HostCommand::Remove { target } => {
            let node = resolve(page, &target)?;
            page.remove(node);
        }
        HostCommand::SetText { target, text } => {
            let node = resolve(page, &target)?;
            page.set_text(node, &text);
        }
        HostCommand::Click { target } => {
            let node = resolve(page, &target)?;
            page.dispatch(EventKind::Click, node);
        }
        HostCommand::Submit { target } => {
            let node = resolve(page, &target)?;
            page.dispatch(EventKind::Submit, node);
        }
        HostCommand::Intersect { target, visible } => {
            let node = resolve(page, &target)?;
            page.set_intersecting(node, visible);
        }
        HostCommand::Visibility { visible } => page.set_visible(visible),
        HostCommand::Navigate { url } => page.set_url(&url),
        HostCommand::Unload => return Ok(Applied::Unload),
    }
    Ok(Applied::Continue)
}

fn resolve(page: &Page, css: &str) -> Result<NodeId, CaptureError> {
    let selector = Selector::parse(css).map_err(|_| CaptureError::InvalidSelector(css.to_string()))?;
    page.query_first(&selector)
        .ok_or_else(|| CaptureError::Validation(format!("no element matches '{}'", css)))
}
