pub(crate) mod cancel;
pub(crate) mod encode;
pub(crate) mod headers;
pub(crate) mod md5;
pub(crate) mod redact;
pub(crate) mod text;
pub(crate) mod url;
pub(crate) mod xml;
