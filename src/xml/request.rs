//! XML request body builders (§4.B). Grounded on the teacher's
//! `caldav/client.rs` free functions (`build_calendar_query_body`,
//! `build_calendar_multiget_body`, `build_sync_collection_body`) and the
//! filter-building discipline of `caldav/query.rs`, generalized so the time
//! range and component filters are shared helpers rather than duplicated
//! per-builder string formatting.

pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

const DAV_NS: &str = r#"xmlns:D="DAV:""#;
const CAL_NS: &str = r#"xmlns:C="urn:ietf:params:xml:ns:caldav""#;

/// `PROPFIND current-user-principal` at Depth 0.
pub fn build_current_user_principal_body() -> String {
    format!(r#"<D:propfind {DAV_NS}><D:prop><D:current-user-principal/></D:prop></D:propfind>"#)
}

/// `PROPFIND calendar-home-set` on the principal URL.
pub fn build_calendar_home_set_body() -> String {
    format!(
        r#"<D:propfind {DAV_NS} {CAL_NS}><D:prop><C:calendar-home-set/></D:prop></D:propfind>"#
    )
}

/// `PROPFIND` depth-1 collection listing per §4.B: displayname,
/// resourcetype, calendar-color, getctag, sync-token, supported-report-set,
/// current-user-privilege-set.
pub fn build_collection_listing_body() -> String {
    format!(
        r#"<D:propfind {DAV_NS} {CAL_NS} xmlns:CS="http://calendarserver.org/ns/">
<D:prop>
<D:displayname/>
<D:resourcetype/>
<D:getetag/>
<C:calendar-description/>
<C:calendar-timezone/>
<C:supported-calendar-component-set/>
<CS:getctag/>
<D:sync-token/>
<D:supported-report-set/>
<D:current-user-privilege-set/>
<D:owner/>
<CS:calendar-color/>
</D:prop>
</D:propfind>"#
    )
}

/// `PROPFIND getetag` against a single resource.
pub fn build_getetag_body() -> String {
    format!(r#"<D:propfind {DAV_NS}><D:prop><D:getetag/></D:prop></D:propfind>"#)
}

/// `PROPFIND getctag` against a calendar collection (§4.E step 1).
pub fn build_getctag_body() -> String {
    format!(
        r#"<D:propfind {DAV_NS} xmlns:CS="http://calendarserver.org/ns/"><D:prop><CS:getctag/></D:prop></D:propfind>"#
    )
}

fn time_range_filter(component: &str, start: Option<&str>, end: Option<&str>) -> String {
    let mut filter = format!(
        r#"<C:filter><C:comp-filter name="VCALENDAR"><C:comp-filter name="{}">"#,
        escape_xml(component)
    );
    if start.is_some() || end.is_some() {
        filter.push_str("<C:time-range");
        if let Some(s) = start {
            filter.push_str(&format!(r#" start="{}""#, escape_xml(s)));
        }
        if let Some(e) = end {
            filter.push_str(&format!(r#" end="{}""#, escape_xml(e)));
        }
        filter.push_str("/>");
    }
    filter.push_str("</C:comp-filter></C:comp-filter></C:filter>");
    filter
}

/// `REPORT calendar-query` with a VEVENT time-range filter. The *etag-only*
/// form used by the change detector's EtagRange path requests only
/// `getetag`; pass `include_data = true` for the rarer data-including form.
pub fn build_calendar_query_body(
    component: &str,
    start: Option<&str>,
    end: Option<&str>,
    include_data: bool,
) -> String {
    let mut prop = String::from("<D:prop><D:getetag/>");
    if include_data {
        prop.push_str("<C:calendar-data/>");
    }
    prop.push_str("</D:prop>");
    let filter = time_range_filter(component, start, end);
    format!(r#"<C:calendar-query {DAV_NS} {CAL_NS}>{prop}{filter}</C:calendar-query>"#)
}

/// `REPORT calendar-multiget`, `getetag`+`calendar-data` for explicit hrefs.
/// Returns `None` if there are zero non-empty hrefs (nothing to fetch).
pub fn build_calendar_multiget_body<I, S>(hrefs: I, include_data: bool) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut body = String::from(&format!(r#"<C:calendar-multiget {DAV_NS} {CAL_NS}><D:prop><D:getetag/>"#));
    if include_data {
        body.push_str("<C:calendar-data/>");
    }
    body.push_str("</D:prop>");
    let mut any = false;
    for href in hrefs {
        let href = href.as_ref();
        if href.is_empty() {
            continue;
        }
        any = true;
        body.push_str("<D:href>");
        body.push_str(&escape_xml(href));
        body.push_str("</D:href>");
    }
    if !any {
        return None;
    }
    body.push_str("</C:calendar-multiget>");
    Some(body)
}

/// `REPORT sync-collection` with a sync-token (RFC 6578).
pub fn build_sync_collection_body(sync_token: Option<&str>, limit: Option<u32>, include_data: bool) -> String {
    let mut body = format!(r#"<D:sync-collection {DAV_NS} {CAL_NS}>"#);
    match sync_token {
        Some(token) => {
            body.push_str("<D:sync-token>");
            body.push_str(&escape_xml(token));
            body.push_str("</D:sync-token>");
        }
        None => body.push_str("<D:sync-token/>"),
    }
    body.push_str("<D:sync-level>1</D:sync-level><D:prop><D:getetag/>");
    if include_data {
        body.push_str("<C:calendar-data/>");
    }
    body.push_str("</D:prop>");
    if let Some(limit) = limit {
        body.push_str(&format!("<D:limit><D:nresults>{limit}</D:nresults></D:limit>"));
    }
    body.push_str("</D:sync-collection>");
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_xml_covers_all_special_chars() {
        assert_eq!(escape_xml("&<>\"'"), "&amp;&lt;&gt;&quot;&apos;");
        assert_eq!(escape_xml(""), "");
        assert_eq!(escape_xml("plain"), "plain");
    }

    #[test]
    fn calendar_query_body_includes_time_range_when_given() {
        let body = build_calendar_query_body("VEVENT", Some("20240101T000000Z"), Some("20240201T000000Z"), false);
        assert!(body.contains(r#"name="VEVENT""#));
        assert!(body.contains(r#"start="20240101T000000Z""#));
        assert!(body.contains(r#"end="20240201T000000Z""#));
        assert!(!body.contains("calendar-data"));
    }

    #[test]
    fn calendar_query_body_omits_time_range_when_absent() {
        let body = build_calendar_query_body("VEVENT", None, None, true);
        assert!(!body.contains("time-range"));
        assert!(body.contains("calendar-data"));
    }

    #[test]
    fn multiget_body_escapes_hrefs_and_requires_at_least_one() {
        let body = build_calendar_multiget_body(["/a&b.ics", ""], true).unwrap();
        assert!(body.contains("/a&amp;b.ics"));
        assert_eq!(body.matches("<D:href>").count(), 1);
        assert!(build_calendar_multiget_body(Vec::<&str>::new(), true).is_none());
    }

    #[test]
    fn sync_collection_body_encodes_token_and_limit() {
        let body = build_sync_collection_body(Some("opaque-token"), Some(50), false);
        assert!(body.contains("<D:sync-token>opaque-token</D:sync-token>"));
        assert!(body.contains("<D:nresults>50</D:nresults>"));

        let fresh = build_sync_collection_body(None, None, false);
        assert!(fresh.contains("<D:sync-token/>"));
        assert!(!fresh.contains("nresults"));
    }
}
