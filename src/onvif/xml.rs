//! Namespace-agnostic XML extraction for SOAP responses

/// Text content of the first `tag` element, with or without a namespace prefix
pub fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let patterns = [format!(":{}>", tag), format!("<{}>", tag)];

    for pattern in &patterns {
        let mut search_from = 0;
        while let Some(found) = xml[search_from..].find(pattern.as_str()) {
            let start = search_from + found;
            // Skip closing tags (`</ns:Tag>`)
            if is_closing_tag(xml, start) {
                search_from = start + pattern.len();
                continue;
            }
            let content_start = start + pattern.len();
            let end = xml[content_start..].find("</")?;
            let value = xml[content_start..content_start + end].trim();
            if value.is_empty() {
                return None;
            }
            return Some(unescape(value));
        }
    }
    None
}

/// Attribute of the first `tag` element, e.g. `<trt:Profiles token="main">`
pub fn extract_xml_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let patterns = [format!(":{} ", tag), format!("<{} ", tag)];

    for pattern in &patterns {
        let Some(start) = xml.find(pattern.as_str()) else {
            continue;
        };
        let after_tag = &xml[start..];
        let tag_end = after_tag.find('>')?;
        let tag_content = &after_tag[..tag_end];

        let attr_pattern = format!(" {}=", attr);
        let attr_start = tag_content.find(attr_pattern.as_str())?;
        let after_attr = &tag_content[attr_start + attr_pattern.len()..];
        let quote = after_attr.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let value = &after_attr[1..];
        let value_end = value.find(quote)?;
        return Some(unescape(&value[..value_end]));
    }
    None
}

/// XAddr inside a capability section, e.g. `<tt:Media><tt:XAddr>..`
pub fn extract_capability_xaddr(xml: &str, capability: &str) -> Option<String> {
    section(xml, capability)
        .into_iter()
        .find_map(|body| extract_xml_value(body, "XAddr"))
}

/// Bodies of every `tag` element in document order
pub fn sections<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!(":{}>", tag);
    let close = format!(":{}>", tag);
    let mut found = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(open.as_str()) {
        let offset = start + open.len();
        if is_closing_tag(rest, start) {
            rest = &rest[offset..];
            continue;
        }
        let body = &rest[offset..];
        // Next closing tag for the same element name
        let mut end = None;
        let mut search = 0;
        while let Some(idx) = body[search..].find(close.as_str()) {
            let at = search + idx;
            if is_closing_tag(body, at) {
                end = Some(at);
                break;
            }
            search = at + close.len();
        }
        match end {
            Some(end) => {
                let close_start = body[..end].rfind("</").unwrap_or(end);
                found.push(&body[..close_start]);
                rest = &body[end + close.len()..];
            }
            None => break,
        }
    }
    found
}

fn section<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    sections(xml, tag).into_iter().next()
}

/// True when the `:Tag>` match at `pos` belongs to `</ns:Tag>`
fn is_closing_tag(xml: &str, pos: usize) -> bool {
    let head = &xml[..pos];
    match head.rfind('<') {
        Some(lt) => {
            let between = &head[lt..];
            between.starts_with("</") && !between.contains('>')
        }
        None => false,
    }
}

/// Decode the five predefined XML entities
pub fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPABILITIES: &str = r#"<env:Body><tds:GetCapabilitiesResponse><tds:Capabilities>
        <tt:Device><tt:XAddr>http://10.0.0.5/onvif/device_service</tt:XAddr></tt:Device>
        <tt:Media><tt:XAddr>http://10.0.0.5/onvif/media_service</tt:XAddr></tt:Media>
        </tds:Capabilities></tds:GetCapabilitiesResponse></env:Body>"#;

    #[test]
    fn test_extract_value_any_prefix() {
        let xml = "<trt:MediaUri><tt:Uri>http://10.0.0.5/snap?a=1&amp;b=2</tt:Uri></trt:MediaUri>";
        assert_eq!(
            extract_xml_value(xml, "Uri").as_deref(),
            Some("http://10.0.0.5/snap?a=1&b=2")
        );
        assert_eq!(extract_xml_value("<Name>Gate</Name>", "Name").as_deref(), Some("Gate"));
        assert_eq!(extract_xml_value("<a:Empty></a:Empty>", "Empty"), None);
        assert_eq!(extract_xml_value(xml, "Missing"), None);
    }

    #[test]
    fn test_capability_xaddr() {
        assert_eq!(
            extract_capability_xaddr(CAPABILITIES, "Media").as_deref(),
            Some("http://10.0.0.5/onvif/media_service")
        );
        assert_eq!(extract_capability_xaddr(CAPABILITIES, "PTZ"), None);
    }

    #[test]
    fn test_profile_token_attribute() {
        let xml = r#"<trt:GetProfilesResponse><trt:Profiles fixed="true" token="Profile_1"><tt:Name>main</tt:Name></trt:Profiles></trt:GetProfilesResponse>"#;
        assert_eq!(
            extract_xml_attribute(xml, "Profiles", "token").as_deref(),
            Some("Profile_1")
        );
    }

    #[test]
    fn test_sections_in_order() {
        let xml = "<d:ProbeMatches><d:ProbeMatch><a>1</a></d:ProbeMatch><d:ProbeMatch><a>2</a></d:ProbeMatch></d:ProbeMatches>";
        let found = sections(xml, "ProbeMatch");
        assert_eq!(found, vec!["<a>1</a>", "<a>2</a>"]);
    }
}
