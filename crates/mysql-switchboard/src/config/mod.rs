//! Configuration module
//!
//! The file is read once at startup. `servers` is an ordered list of
//! backends; the first one whose user and password match a login wins.
//!
//! ```yaml
//! listen:
//!   address: "0.0.0.0"
//!   port: 4000
//! fallback:
//!   username: root
//!   password: "123456"
//! servers:
//!   - name: primary
//!     host: 10.0.0.5
//!     port: 3306
//!     user: app
//!     password: secret
//! ```

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_from_str};
pub use types::*;
