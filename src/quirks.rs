//! Per-server-family policy object (§4.C). A single value, not a subclass
//! hierarchy, per §9 "server-family polymorphism" guidance — the core
//! algorithms take a `&Quirks` parameter and never branch on provider family
//! themselves.

use crate::model::ProviderFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tri {
    Yes,
    No,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalUrlShape {
    UserPrefixed,
    OpaqueHash,
    HostnameOnly,
}

/// Recognized quirk dimensions from the §4.C table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quirks {
    pub family: ProviderFamily,
    pub body_in_calendar_query: bool,
    pub multi_href_multiget: bool,
    pub max_hrefs_per_multiget: usize,
    pub ctag_support: Tri,
    pub sync_collection_support: bool,
    pub discovery_probe_paths: Vec<&'static str>,
    pub well_known_honored: bool,
    pub etag_in_put_response: bool,
    pub allow_201_as_update: bool,
    pub tolerate_weak_etag: bool,
    pub principal_url_shape: PrincipalUrlShape,
    pub empty_body_200_signals_single_href: bool,
    /// Path fragments identifying RFC 6638 scheduling inbox/outbox
    /// collections, which carry `resourcetype calendar` on some servers but
    /// are never sync targets (§4.D step 5).
    pub inbox_outbox_sentinels: Vec<&'static str>,
}

const DEFAULT_INBOX_OUTBOX_SENTINELS: &[&str] = &["/inbox/", "/outbox/"];

const DEFAULT_PROBE_PATHS: &[&str] = &[
    "/dav/",
    "/remote.php/dav/",
    "/dav.php/",
    "/caldav",
    "/caldav/",
    "/dav/cal/",
    "/SOGo/dav/",
];

impl Quirks {
    /// Safe generic defaults; used when provider detection finds nothing
    /// more specific.
    pub fn default_for(family: ProviderFamily) -> Self {
        let base = Quirks {
            family,
            body_in_calendar_query: true,
            multi_href_multiget: true,
            max_hrefs_per_multiget: 50,
            ctag_support: Tri::Yes,
            sync_collection_support: true,
            discovery_probe_paths: DEFAULT_PROBE_PATHS.to_vec(),
            well_known_honored: true,
            etag_in_put_response: true,
            allow_201_as_update: false,
            tolerate_weak_etag: true,
            principal_url_shape: PrincipalUrlShape::UserPrefixed,
            empty_body_200_signals_single_href: false,
            inbox_outbox_sentinels: DEFAULT_INBOX_OUTBOX_SENTINELS.to_vec(),
        };
        match family {
            ProviderFamily::Zoho => Quirks {
                body_in_calendar_query: false,
                multi_href_multiget: false,
                ctag_support: Tri::Conditional,
                allow_201_as_update: true,
                empty_body_200_signals_single_href: true,
                ..base
            },
            ProviderFamily::Nextcloud => Quirks {
                etag_in_put_response: false,
                max_hrefs_per_multiget: 10,
                ..base
            },
            ProviderFamily::OpenXchange => Quirks {
                principal_url_shape: PrincipalUrlShape::OpaqueHash,
                ..base
            },
            ProviderFamily::Stalwart => Quirks {
                principal_url_shape: PrincipalUrlShape::HostnameOnly,
                ..base
            },
            ProviderFamily::ICloud => Quirks {
                max_hrefs_per_multiget: 15,
                ..base
            },
            _ => base,
        }
    }

    /// Detect a provider family from discovery-time signals: server URL,
    /// `Server` header, or `DAV:` header tokens, per §4.C.
    pub fn detect_family(base_url: &str, server_header: Option<&str>, dav_header: Option<&str>) -> ProviderFamily {
        let host = base_url.to_ascii_lowercase();
        let server = server_header.unwrap_or("").to_ascii_lowercase();
        let dav = dav_header.unwrap_or("").to_ascii_lowercase();

        if host.contains("icloud.com") {
            ProviderFamily::ICloud
        } else if host.contains("zoho.com") {
            ProviderFamily::Zoho
        } else if server.contains("nextcloud") || dav.contains("nextcloud") {
            ProviderFamily::Nextcloud
        } else if host.contains("dav.php") || server.contains("baikal") {
            ProviderFamily::Baikal
        } else if host.contains("/sogo/") || server.contains("sogo") {
            ProviderFamily::Sogo
        } else if server.contains("radicale") {
            ProviderFamily::Radicale
        } else if server.contains("stalwart") {
            ProviderFamily::Stalwart
        } else if host.contains("mailbox.org") {
            ProviderFamily::MailboxOrg
        } else if server.contains("open-xchange") || server.contains("ox.") {
            ProviderFamily::OpenXchange
        } else {
            ProviderFamily::Generic
        }
    }
}
