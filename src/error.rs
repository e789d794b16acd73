use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue full, gave up after {0} ms")]
    Full(u64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
    #[error("read of `{key}` failed: {code}")]
    Read { key: &'static str, code: i32 },
    #[error("write of `{key}` failed: {code}")]
    Write { key: &'static str, code: i32 },
    #[error("commit failed: {0}")]
    Commit(i32),
    #[error("erase failed: {0}")]
    Erase(i32),
    #[error("key `{0}` is not a valid store key")]
    BadKey(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WifiError {
    #[error("wifi driver error {0}")]
    Driver(i32),
    #[error("ssid or password too long")]
    CredentialsTooLong,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no subscribed peer")]
    NotSubscribed,
    #[error("notify failed: {0}")]
    Notify(i32),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse settings: {0}")]
    Parse(#[from] ron::error::SpannedError),
}
