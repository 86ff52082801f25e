//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module    | Command   |
//! |-----------|-----------|
//! | `serve`   | `Serve`   |
//! | `init`    | `Init`    |
//! | `reindex` | `Reindex` |
//! | `config`  | `Config`  |

pub mod config;
pub mod init;
pub mod reindex;
pub mod serve;

pub use config::cmd_config;
pub use init::cmd_init;
pub use reindex::cmd_reindex;
pub use serve::cmd_serve;
