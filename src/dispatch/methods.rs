//! Websocket-specific method name constants, grouped the way the teacher's
//! `dcrjson::rpc_types` groups its `METHOD_*` constants.

pub const HELP: &str = "help";
pub const SESSION: &str = "session";
pub const AUTHENTICATE: &str = "authenticate";

pub const NOTIFY_BLOCKS: &str = "notifyblocks";
pub const STOP_NOTIFY_BLOCKS: &str = "stopnotifyblocks";
pub const NOTIFY_NEW_TRANSACTIONS: &str = "notifynewtransactions";
pub const STOP_NOTIFY_NEW_TRANSACTIONS: &str = "stopnotifynewtransactions";
pub const NOTIFY_RECEIVED: &str = "notifyreceived";
pub const STOP_NOTIFY_RECEIVED: &str = "stopnotifyreceived";
pub const NOTIFY_SPENT: &str = "notifyspent";
pub const STOP_NOTIFY_SPENT: &str = "stopnotifyspent";
pub const RESCAN: &str = "rescan";

/// Every method this crate implements itself, rather than delegating to the
/// standard command dispatcher (spec.md §4.D).
pub const WEBSOCKET_METHODS: &[&str] = &[
    HELP,
    SESSION,
    NOTIFY_BLOCKS,
    STOP_NOTIFY_BLOCKS,
    NOTIFY_NEW_TRANSACTIONS,
    STOP_NOTIFY_NEW_TRANSACTIONS,
    NOTIFY_RECEIVED,
    STOP_NOTIFY_RECEIVED,
    NOTIFY_SPENT,
    STOP_NOTIFY_SPENT,
    RESCAN,
];

/// Methods handed to the async worker instead of executed inline
/// (spec.md §4.C "long-running dispatch").
pub const ASYNC_METHODS: &[&str] = &[RESCAN];

pub fn is_async_method(method: &str) -> bool {
    ASYNC_METHODS.contains(&method)
}

pub fn is_websocket_method(method: &str) -> bool {
    WEBSOCKET_METHODS.contains(&method)
}

/// Fixed allow-list of methods a non-admin ("limited") client may invoke
/// (spec.md §4.D step 3). Requests for any other method from a limited
/// client never reach dispatch.
pub const LIMITED_ALLOWED: &[&str] = &[
    HELP,
    SESSION,
    NOTIFY_BLOCKS,
    STOP_NOTIFY_BLOCKS,
    NOTIFY_NEW_TRANSACTIONS,
    STOP_NOTIFY_NEW_TRANSACTIONS,
    NOTIFY_RECEIVED,
    STOP_NOTIFY_RECEIVED,
    NOTIFY_SPENT,
    STOP_NOTIFY_SPENT,
];

pub fn limited_user_may_call(method: &str) -> bool {
    LIMITED_ALLOWED.contains(&method)
}
