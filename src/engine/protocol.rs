//! Framing spoken with the Python engine host.
//!
//! A message is one JSON header line followed by raw payloads; the header's
//! `sizes` array lists each payload's length in order. Requests carry an
//! `op`, replies carry `ok` and, on failure, `error`.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use crate::utils::{EngineError, EngineResult};

/// Header lines longer than this are treated as a corrupted stream.
const MAX_HEADER_LEN: usize = 64 * 1024;
/// Largest single payload a reply may announce.
const MAX_PAYLOAD_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Load,
    Install,
    Invoke,
    Release,
    Gc,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub op: Op,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub sizes: Vec<usize>,
}

impl Request {
    pub fn new(op: Op) -> Self {
        Self {
            op,
            name: None,
            capabilities: Vec::new(),
            sizes: Vec::new(),
        }
    }

    pub fn named(op: Op, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(op)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sizes: Vec<usize>,
}

/// Writes `request` followed by `payloads`; the header's sizes are filled in here.
pub async fn write_request<W>(writer: &mut W, mut request: Request, payloads: &[&[u8]]) -> EngineResult<()>
where
    W: AsyncWrite + Unpin,
{
    request.sizes = payloads.iter().map(|p| p.len()).collect();
    let mut header = serde_json::to_vec(&request)
        .map_err(|e| EngineError::protocol(format!("Failed to encode request: {e}")))?;
    header.push(b'\n');

    writer.write_all(&header).await?;
    for payload in payloads {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads one reply frame. EOF before a header means the host is gone.
pub async fn read_response<R>(reader: &mut R) -> EngineResult<(Response, Vec<Vec<u8>>)>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_HEADER_LEN as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Err(EngineError::closed("engine host closed its output"));
    }
    if line.last() != Some(&b'\n') {
        return Err(EngineError::protocol(if line.len() > MAX_HEADER_LEN {
            "reply header too long".to_string()
        } else {
            "reply header truncated".to_string()
        }));
    }

    let response: Response = serde_json::from_slice(&line)
        .map_err(|e| EngineError::protocol(format!("Malformed reply header: {e}")))?;

    if let Some(&size) = response.sizes.iter().find(|&&size| size > MAX_PAYLOAD_LEN) {
        return Err(EngineError::protocol(format!(
            "Reply announces a {size} byte payload, limit is {MAX_PAYLOAD_LEN}"
        )));
    }

    let mut payloads = Vec::with_capacity(response.sizes.len());
    for &size in &response.sizes {
        let mut payload = vec![0u8; size];
        reader.read_exact(&mut payload).await?;
        payloads.push(payload);
    }
    Ok((response, payloads))
}

/// Turns a reply into its payloads, mapping `ok: false` through `on_error`.
pub fn into_payloads(
    (response, payloads): (Response, Vec<Vec<u8>>),
    on_error: impl FnOnce(String) -> EngineError,
) -> EngineResult<Vec<Vec<u8>>> {
    if response.ok {
        Ok(payloads)
    } else {
        Err(on_error(response.error.unwrap_or_else(|| "unknown engine error".to_string())))
    }
}
