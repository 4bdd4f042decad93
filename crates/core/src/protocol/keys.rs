// Key tables for the measurement protocol
//
// Internal (descriptive) field names on the left, short wire keys on the
// right. Within a table no two internal names may share a wire key.

/// Global and page context fields
pub const BASE_KEYS: &[(&str, &str)] = &[
    ("anonymizeIp", "aip"),
    ("eventCategory", "ec"),
    ("eventAction", "ea"),
    ("eventLabel", "el"),
    ("eventValue", "ev"),
    ("page", "dp"),
    ("clientId", "cid"),
    ("userId", "uid"),
    ("currencyCode", "cu"),
    ("hitType", "t"),
    ("pageViewId", "pid"),
    ("encoding", "de"),
    ("location", "dl"),
    ("referrer", "dr"),
    ("screenColor", "sd"),
    ("screenResolution", "sr"),
    ("title", "dt"),
    ("userAgent", "ua"),
    ("language", "ul"),
    ("eventId", "z"),
    ("time", "tm"),
];

/// Product action fields (ecommerce `setAction`)
pub const PRODUCT_ACTION_KEYS: &[(&str, &str)] = &[
    ("action", "pa"),
    ("list", "pal"),
    ("listSource", "pls"),
];

/// Transaction fields carried by purchase/refund actions
pub const TRANSACTION_KEYS: &[(&str, &str)] = &[
    ("id", "ti"),
    ("revenue", "tr"),
    ("tax", "tt"),
    ("shipping", "ts"),
    ("coupon", "tcc"),
    ("affiliation", "ta"),
    ("step", "cos"),
    ("option", "col"),
];

/// Service action fields
pub const SERVICE_ACTION_KEYS: &[(&str, &str)] = &[
    ("svcAction", "svc_action"),
    ("svcActionData", "svc_action_data"),
];

/// Support ticket fields
pub const TICKET_KEYS: &[(&str, &str)] = &[
    ("id", "svc_ticket_id"),
    ("subject", "svc_ticket_subject"),
    ("description", "svc_ticket_description"),
    ("category", "svc_ticket_category"),
    ("productId", "svc_ticket_product_id"),
    ("custom", "svc_ticket_custom"),
];

/// Per-product fields, emitted as `pr{N}{key}`
pub const PRODUCT_KEYS: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "nm"),
    ("brand", "br"),
    ("category", "ca"),
    ("variant", "va"),
    ("price", "pr"),
    ("quantity", "qt"),
    ("coupon", "cc"),
    ("position", "ps"),
    ("group", "group"),
];

/// Per-impression fields, emitted as `il{N}pi{M}{key}`
pub const IMPRESSION_KEYS: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "nm"),
    ("brand", "br"),
    ("category", "ca"),
    ("variant", "va"),
    ("position", "ps"),
    ("price", "pr"),
    ("group", "group"),
];

/// Commerce extension fields sent under their own names
pub const EXTENSION_KEYS: &[&str] = &[
    "loyaltyCardId",
    "loyaltyTier",
    "thirdPartyPersona",
    "companyName",
    "favoriteStore",
    "storeName",
    "userIndustry",
    "userRole",
    "userDepartment",
    "businessUnit",
];

/// Tables applied to top-level payload keys, in lookup order
pub const TOP_LEVEL_TABLES: &[&[(&str, &str)]] = &[
    BASE_KEYS,
    PRODUCT_ACTION_KEYS,
    TRANSACTION_KEYS,
    SERVICE_ACTION_KEYS,
];

/// Look up `key` in a table
pub fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(internal, _)| *internal == key)
        .map(|(_, short)| *short)
}
