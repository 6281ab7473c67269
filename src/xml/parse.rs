//! Namespace-tolerant multistatus XML parser (§4.B), superseding the
//! teacher's `caldav/streaming.rs`. Keeps the event-driven
//! `stack`/`path_ends_with` architecture — matching on local element name
//! only, prefixes are cosmetic — but generalizes it to score properties
//! **per propstat by its own status** (default 200 if the status element is
//! absent, per RFC 4918), which the teacher's single-status simplification
//! does not do. Also centralizes ETag normalization (weak/quoted/unquoted/
//! XML-entity-encoded forms).

use std::io::Cursor;
use std::mem;

use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;

use crate::error::{DataErrorKind, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum El {
    Multistatus,
    Response,
    Propstat,
    Prop,
    Href,
    Status,
    Displayname,
    Getetag,
    Resourcetype,
    Collection,
    Calendar,
    Comp,
    CalendarData,
    CalendarDescription,
    CalendarTimezone,
    CalendarColor,
    SyncToken,
    CalendarHomeSet,
    CurrentUserPrincipal,
    Owner,
    Getcontenttype,
    Getlastmodified,
    Getctag,
    CurrentUserPrivilegeSet,
    Privilege,
    Write,
    Other,
}

fn local_name(raw: &[u8]) -> &[u8] {
    match raw.iter().position(|&b| b == b':') {
        Some(idx) => &raw[idx + 1..],
        None => raw,
    }
}

fn element_from_bytes(raw: &[u8]) -> El {
    let name = local_name(raw);
    let eq = |s: &str| name.eq_ignore_ascii_case(s.as_bytes());
    if eq("multistatus") {
        El::Multistatus
    } else if eq("response") {
        El::Response
    } else if eq("propstat") {
        El::Propstat
    } else if eq("prop") {
        El::Prop
    } else if eq("href") {
        El::Href
    } else if eq("status") {
        El::Status
    } else if eq("displayname") {
        El::Displayname
    } else if eq("getetag") {
        El::Getetag
    } else if eq("resourcetype") {
        El::Resourcetype
    } else if eq("collection") {
        El::Collection
    } else if eq("calendar") {
        El::Calendar
    } else if eq("comp") {
        El::Comp
    } else if eq("calendar-data") {
        El::CalendarData
    } else if eq("calendar-description") {
        El::CalendarDescription
    } else if eq("calendar-timezone") {
        El::CalendarTimezone
    } else if eq("calendar-color") {
        El::CalendarColor
    } else if eq("sync-token") {
        El::SyncToken
    } else if eq("calendar-home-set") {
        El::CalendarHomeSet
    } else if eq("current-user-principal") {
        El::CurrentUserPrincipal
    } else if eq("owner") {
        El::Owner
    } else if eq("getcontenttype") {
        El::Getcontenttype
    } else if eq("getlastmodified") {
        El::Getlastmodified
    } else if eq("getctag") {
        El::Getctag
    } else if eq("current-user-privilege-set") {
        El::CurrentUserPrivilegeSet
    } else if eq("privilege") {
        El::Privilege
    } else if eq("write") || eq("write-content") || eq("all") {
        El::Write
    } else {
        El::Other
    }
}

/// ETag normalization (§4.B, invariant 2 of §8): strip a `W/` weak-etag
/// prefix, surrounding quotes (literal or `&quot;`-encoded), and whitespace.
/// An empty result after normalization becomes `None`. Idempotent:
/// `normalize_etag(normalize_etag(t)) == normalize_etag(t)` for any
/// already-normalized `t` fed back in as a string.
pub fn normalize_etag(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("W/") {
        s = rest.trim();
    }
    let decoded = s.replace("&quot;", "\"").replace("&#34;", "\"");
    let trimmed = decoded.trim().trim_matches('"').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Whether an HTTP status line's code is in the 2xx range. Absent status
/// defaults to OK per RFC 4918.
fn status_is_ok(status_line: &Option<String>) -> bool {
    match status_line {
        None => true,
        Some(line) => parse_status_code(line).map(|c| (200..300).contains(&c)).unwrap_or(false),
    }
}

fn parse_status_code(status_line: &str) -> Option<u16> {
    status_line.split_whitespace().nth(1).and_then(|s| s.parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeLevel {
    Unknown,
    ReadOnly,
    ReadWrite,
}

/// One `<response>` element's extracted properties, filtered by per-propstat
/// status.
#[derive(Debug, Clone, Default)]
pub struct DavItem {
    pub href: String,
    pub status: Option<String>,
    pub displayname: Option<String>,
    pub etag: Option<String>,
    pub is_collection: bool,
    pub is_calendar: bool,
    pub supported_components: Vec<String>,
    pub calendar_data: Option<String>,
    pub calendar_home_set: Vec<String>,
    pub current_user_principal: Vec<String>,
    pub owner: Option<String>,
    pub calendar_description: Option<String>,
    pub calendar_timezone: Option<String>,
    pub calendar_color: Option<String>,
    pub sync_token: Option<String>,
    pub ctag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub privilege: PrivilegeLevel,
}

pub struct ParseResult {
    pub items: Vec<DavItem>,
    pub sync_token: Option<String>,
}

impl IntoIterator for ParseResult {
    type Item = DavItem;
    type IntoIter = std::vec::IntoIter<DavItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Per-propstat scratch accumulator, merged into the response-level item
/// only if its propstat closes with an OK status.
#[derive(Default)]
struct PropBag {
    displayname: Option<String>,
    etag_raw: Option<String>,
    is_collection: bool,
    is_calendar: bool,
    supported_components: Vec<String>,
    calendar_data: Option<String>,
    calendar_home_set: Vec<String>,
    current_user_principal: Vec<String>,
    owner: Option<String>,
    calendar_description: Option<String>,
    calendar_timezone: Option<String>,
    calendar_color: Option<String>,
    sync_token: Option<String>,
    ctag: Option<String>,
    content_type: Option<String>,
    last_modified: Option<String>,
    saw_write_privilege: bool,
    in_privilege_set: bool,
}

fn merge_propstat(item: &mut DavItem, bag: PropBag) {
    if bag.displayname.is_some() {
        item.displayname = bag.displayname;
    }
    if let Some(raw) = bag.etag_raw {
        item.etag = Some(normalize_etag(&raw).unwrap_or_default());
    }
    item.is_collection |= bag.is_collection;
    item.is_calendar |= bag.is_calendar;
    if !bag.supported_components.is_empty() {
        item.supported_components = bag.supported_components;
    }
    if bag.calendar_data.is_some() {
        item.calendar_data = bag.calendar_data;
    }
    if !bag.calendar_home_set.is_empty() {
        item.calendar_home_set = bag.calendar_home_set;
    }
    if !bag.current_user_principal.is_empty() {
        item.current_user_principal = bag.current_user_principal;
    }
    if bag.owner.is_some() {
        item.owner = bag.owner;
    }
    if bag.calendar_description.is_some() {
        item.calendar_description = bag.calendar_description;
    }
    if bag.calendar_timezone.is_some() {
        item.calendar_timezone = bag.calendar_timezone;
    }
    if bag.calendar_color.is_some() {
        item.calendar_color = bag.calendar_color;
    }
    if bag.sync_token.is_some() {
        item.sync_token = bag.sync_token;
    }
    if bag.ctag.is_some() {
        item.ctag = bag.ctag;
    }
    if bag.content_type.is_some() {
        item.content_type = bag.content_type;
    }
    if bag.last_modified.is_some() {
        item.last_modified = bag.last_modified;
    }
    if bag.in_privilege_set {
        item.privilege = if bag.saw_write_privilege {
            PrivilegeLevel::ReadWrite
        } else {
            PrivilegeLevel::ReadOnly
        };
    }
}

struct MultistatusParser {
    stack: Vec<El>,
    item: DavItem,
    response_status: Option<String>,
    propstat_status: Option<String>,
    bag: PropBag,
    top_sync_token: Option<String>,
    items: Vec<DavItem>,
}

impl MultistatusParser {
    fn new() -> Self {
        MultistatusParser {
            stack: Vec::with_capacity(16),
            item: DavItem::default(),
            response_status: None,
            propstat_status: None,
            bag: PropBag::default(),
            top_sync_token: None,
            items: Vec::new(),
        }
    }

    fn path_ends_with(&self, needle: &[El]) -> bool {
        if needle.len() > self.stack.len() {
            return false;
        }
        self.stack[self.stack.len() - needle.len()..] == *needle
    }

    fn on_start(&mut self, raw_name: &[u8], attr_name_for_comp: Option<String>) {
        let el = element_from_bytes(raw_name);
        self.stack.push(el);
        match el {
            El::Response => {
                self.item = DavItem::default();
                self.response_status = None;
            }
            El::Propstat => {
                self.bag = PropBag::default();
                self.propstat_status = None;
            }
            El::Collection if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::Resourcetype, El::Collection]) => {
                self.bag.is_collection = true;
            }
            El::Calendar if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::Resourcetype, El::Calendar]) => {
                self.bag.is_calendar = true;
            }
            El::Comp if self.path_ends_with(&[
                El::Response,
                El::Propstat,
                El::Prop,
                El::Comp,
            ]) || self.path_ends_with(&[
                El::Response,
                El::Propstat,
                El::Prop,
                El::Other,
                El::Comp,
            ]) => {
                if let Some(name) = attr_name_for_comp {
                    self.bag.supported_components.push(name);
                }
            }
            El::CurrentUserPrivilegeSet => {
                self.bag.in_privilege_set = true;
            }
            El::Write if self.bag.in_privilege_set => {
                self.bag.saw_write_privilege = true;
            }
            _ => {}
        }
    }

    fn on_end(&mut self) {
        let Some(popped) = self.stack.pop() else { return };
        match popped {
            El::Propstat => {
                let ok = status_is_ok(&self.propstat_status);
                let bag = mem::take(&mut self.bag);
                if ok {
                    merge_propstat(&mut self.item, bag);
                }
            }
            El::Response => {
                if !status_is_ok(&self.response_status) {
                    self.item.status = self.response_status.clone();
                }
                let item = mem::take(&mut self.item);
                self.items.push(item);
            }
            _ => {}
        }
    }

    fn handle_text(&mut self, raw: &[u8]) -> Result<(), SyncError> {
        let text = decode_text(raw)?;
        if text.trim().is_empty() && !self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::CalendarData])
            && !self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::CalendarTimezone])
        {
            return Ok(());
        }

        if self.path_ends_with(&[El::Response, El::Status]) {
            self.response_status = Some(append_or_set(&self.response_status, &text));
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Status]) {
            self.propstat_status = Some(append_or_set(&self.propstat_status, &text));
        } else if self.path_ends_with(&[El::Response, El::Href]) {
            self.item.href = text.trim().to_string();
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::Displayname]) {
            self.bag.displayname = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::Getetag]) {
            self.bag.etag_raw = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::CalendarData]) {
            let entry = self.bag.calendar_data.get_or_insert_with(String::new);
            entry.push_str(&text);
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::CalendarDescription]) {
            self.bag.calendar_description = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::CalendarTimezone]) {
            let entry = self.bag.calendar_timezone.get_or_insert_with(String::new);
            entry.push_str(&text);
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::CalendarColor]) {
            self.bag.calendar_color = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::Getctag]) {
            self.bag.ctag = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Multistatus, El::SyncToken]) {
            self.top_sync_token = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::SyncToken]) {
            self.bag.sync_token = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::CalendarHomeSet, El::Href]) {
            self.bag.calendar_home_set.push(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::CurrentUserPrincipal, El::Href]) {
            self.bag.current_user_principal.push(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::Owner, El::Href]) {
            self.bag.owner = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::Getcontenttype]) {
            self.bag.content_type = Some(text.trim().to_string());
        } else if self.path_ends_with(&[El::Response, El::Propstat, El::Prop, El::Getlastmodified]) {
            self.bag.last_modified = Some(text.trim().to_string());
        }
        Ok(())
    }

    fn finish(self) -> ParseResult {
        ParseResult {
            items: self.items,
            sync_token: self.top_sync_token,
        }
    }
}

fn append_or_set(existing: &Option<String>, text: &str) -> String {
    match existing {
        Some(s) if !s.trim().is_empty() => s.clone(),
        _ => text.trim().to_string(),
    }
}

pub fn decode_text(raw: &[u8]) -> Result<String, SyncError> {
    match std::str::from_utf8(raw) {
        Ok(s) => Ok(quick_xml::escape::unescape(s)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| s.to_string())),
        Err(_) => Ok(String::from_utf8_lossy(raw).into_owned()),
    }
}

/// Parse a complete (non-streamed, already-decompressed) multistatus body.
pub fn parse_multistatus_bytes(body: &[u8]) -> Result<ParseResult, SyncError> {
    let mut reader = Reader::from_reader(Cursor::new(body));
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut parser = MultistatusParser::new();
    // quick-xml 0.39 keeps the currently-open element's raw name around for
    // attribute extraction (used only to read the `name="VEVENT"` attribute
    // off `<C:comp>`).
    let mut pending_comp_name: Option<String> = None;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|_| SyncError::Data(DataErrorKind::ParseFailure))?
        {
            XmlEvent::Eof => break,
            XmlEvent::Start(e) => {
                let comp_attr = if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"comp") {
                    e.attributes()
                        .flatten()
                        .find(|a| a.key.as_ref().eq_ignore_ascii_case(b"name"))
                        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
                } else {
                    None
                };
                pending_comp_name = comp_attr;
                let name = e.name().as_ref().to_vec();
                parser.on_start(&name, pending_comp_name.take());
            }
            XmlEvent::Empty(e) => {
                let comp_attr = if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"comp") {
                    e.attributes()
                        .flatten()
                        .find(|a| a.key.as_ref().eq_ignore_ascii_case(b"name"))
                        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
                } else {
                    None
                };
                let name = e.name().as_ref().to_vec();
                parser.on_start(&name, comp_attr);
                parser.on_end();
            }
            XmlEvent::End(_) => {
                parser.on_end();
            }
            XmlEvent::Text(t) => {
                parser.handle_text(t.as_ref())?;
            }
            XmlEvent::CData(c) => {
                parser.handle_text(c.as_ref())?;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(parser.finish())
}
