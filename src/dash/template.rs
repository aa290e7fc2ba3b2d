//! DASH `SegmentTemplate` identifiers and ISO 8601 durations.

/// Values substituted into a segment template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub representation_id: &'a str,
    pub bandwidth: u64,
    pub number: Option<u64>,
    pub time: Option<u64>,
}

/// Expand `$RepresentationID$`, `$Bandwidth$`, `$Number$`, `$Time$` (each
/// optionally with a `%0<width>d` format tag) and `$$`.
///
/// Unknown identifiers, and identifiers with no value, are left as written.
pub fn expand(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &after[..end];
        rest = &after[end + 1..];

        if token.is_empty() {
            out.push('$');
            continue;
        }
        let (ident, format) = match token.split_once('%') {
            Some((ident, format)) => (ident, Some(format)),
            None => (token, None),
        };
        let value = match ident {
            "RepresentationID" => {
                out.push_str(vars.representation_id);
                continue;
            }
            "Bandwidth" => Some(vars.bandwidth),
            "Number" => vars.number,
            "Time" => vars.time,
            _ => None,
        };
        match value {
            Some(value) => out.push_str(&pad(value, format)),
            None => {
                out.push('$');
                out.push_str(token);
                out.push('$');
            }
        }
    }
    out.push_str(rest);
    out
}

/// Apply a `0<width>d` format tag.
fn pad(value: u64, format: Option<&str>) -> String {
    let width = format
        .and_then(|f| f.strip_suffix('d'))
        .map(|f| f.trim_start_matches('0'))
        .and_then(|w| w.parse::<usize>().ok())
        .unwrap_or(0);
    format!("{value:0width$}")
}

/// Parse an `xs:duration` such as `PT1H2M3.5S` or `P1DT2H` into seconds.
///
/// Years and months count as 365 and 30 days.
pub fn parse_duration(raw: &str) -> Option<f64> {
    let body = raw.trim().strip_prefix('P')?;
    let (date, time) = match body.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut seconds = 0.0;
    let mut seen = false;
    for (part, units) in [
        (date, &[('Y', 365.0 * 86_400.0), ('M', 30.0 * 86_400.0), ('W', 7.0 * 86_400.0), ('D', 86_400.0)][..]),
        (time.unwrap_or(""), &[('H', 3_600.0), ('M', 60.0), ('S', 1.0)][..]),
    ] {
        let mut number = String::new();
        for ch in part.chars() {
            if ch.is_ascii_digit() || ch == '.' {
                number.push(ch);
                continue;
            }
            let (_, scale) = units.iter().find(|(unit, _)| *unit == ch)?;
            seconds += number.parse::<f64>().ok()? * scale;
            number.clear();
            seen = true;
        }
        if !number.is_empty() {
            return None;
        }
    }
    if time == Some("") || !seen {
        return None;
    }
    Some(seconds)
}
