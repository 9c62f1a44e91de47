//! Minimal element extraction for callback bodies.
//!
//! Callback payloads are flat `<xml>` documents; only named element text is
//! needed here, so this is not a general parser.

/// Inner text of the first `<tag>...</tag>`, with a CDATA wrapper removed.
pub fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let inner = element_inner(xml, tag)?;
    let trimmed = inner.trim();
    Some(
        trimmed
            .strip_prefix("<![CDATA[")
            .and_then(|s| s.strip_suffix("]]>"))
            .unwrap_or(trimmed),
    )
}

/// Raw inner content of the first `<tag>...</tag>`.
pub fn element_inner<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(&xml[start..end])
}
