//! WS-Discovery multicast probe for ONVIF network video transmitters

use super::xml::{extract_xml_value, sections};
use super::ProbeMatch;
use crate::error::Result;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use uuid::Uuid;

const MULTICAST_ADDR: &str = "239.255.255.250:3702";
const NAME_SCOPE: &str = "onvif://www.onvif.org/name/";

fn probe_message(message_id: Uuid) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope" xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <e:Header>
    <w:MessageID>uuid:{}</w:MessageID>
    <w:To e:mustUnderstand="true">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>
    <w:Action e:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>
  </e:Header>
  <e:Body>
    <d:Probe><d:Types>dn:NetworkVideoTransmitter</d:Types></d:Probe>
  </e:Body>
</e:Envelope>"#,
        message_id
    )
}

/// Multicast a probe and collect matches until `window` elapses
pub async fn probe(window: Duration) -> Result<Vec<ProbeMatch>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let target: SocketAddr = MULTICAST_ADDR
        .parse()
        .map_err(|e| crate::error::Error::Config(format!("bad multicast address: {}", e)))?;
    socket
        .send_to(probe_message(Uuid::new_v4()).as_bytes(), target)
        .await?;

    let deadline = Instant::now() + window;
    let mut buf = vec![0u8; 65_535];
    let mut seen = HashSet::new();
    let mut matches = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (len, from) = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "WS-Discovery receive failed");
                break;
            }
            Err(_) => break,
        };

        let body = String::from_utf8_lossy(&buf[..len]);
        for found in parse_probe_matches(&body) {
            if seen.insert(found.urn.clone()) {
                tracing::debug!(from = %from, urn = %found.urn, address = %found.address, "Device answered probe");
                matches.push(found);
            }
        }
    }

    tracing::info!(found = matches.len(), "WS-Discovery probe finished");
    Ok(matches)
}

/// Parse every ProbeMatch in a ProbeMatches response
pub fn parse_probe_matches(xml: &str) -> Vec<ProbeMatch> {
    sections(xml, "ProbeMatch")
        .into_iter()
        .filter_map(|section| {
            let urn = extract_xml_value(section, "Address")?;
            let address = extract_xml_value(section, "XAddrs")?
                .split_whitespace()
                .find(|x| x.starts_with("http://") || x.starts_with("https://"))?
                .to_string();
            let name = extract_xml_value(section, "Scopes")
                .and_then(|scopes| scope_name(&scopes))
                .unwrap_or_else(|| urn.clone());
            Some(ProbeMatch { address, urn, name })
        })
        .collect()
}

/// Device name from the `onvif://www.onvif.org/name/<name>` scope
fn scope_name(scopes: &str) -> Option<String> {
    let raw = scopes
        .split_whitespace()
        .find_map(|scope| scope.strip_prefix(NAME_SCOPE))?;
    let name = percent_decode(raw);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
