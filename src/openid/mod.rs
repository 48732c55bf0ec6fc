//! OpenID Connect relying-party pieces: discovery, identity token verification, userinfo.

pub mod discovery;
pub mod id_token;
pub mod userinfo;
