//! Build context artifacts
//!
//! Generators for the text files that make up a build context:
//! - `dockerfile`: the image definition
//! - `buildfile`: the build script the container runs as its entrypoint
//! - `proxy`: port forwards from localhost to linked service containers

pub mod buildfile;
pub mod dockerfile;
pub mod proxy;

pub use buildfile::Buildfile;
pub use dockerfile::Dockerfile;
pub use proxy::Proxy;

/// File name of the build script inside the build context
pub const BUILD_SCRIPT: &str = "keel-build";

/// File name of the proxy script inside the build context
pub const PROXY_SCRIPT: &str = "proxy.sh";

/// File name of the identity file inside the build context
pub const IDENTITY_FILE: &str = "id_rsa";

/// File name of the image definition inside the build context
pub const IMAGE_DEFINITION: &str = "Dockerfile";

/// Directory the local repository is copied to inside the build context
pub const SOURCE_DIR: &str = "src";

/// Directory inside the image whose scripts run before the build
pub const INIT_DIR: &str = "/etc/keel.d";

/// Cache directory inside official images
pub const CACHE_DIR: &str = "/var/cache/keel";

/// Quotes a value for use as a single shell word
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
