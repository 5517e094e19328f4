pub mod control;
pub mod error;
pub mod ident;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod raw;
pub mod reconcile;
pub mod render;
pub mod shell;
pub mod state;
pub mod supervisor;
pub mod validate;

pub use error::Error;
pub use model::{CanonicalConfig, Config};

/// The schema version newly loaded configuration is migrated forward to
/// before validation. Advancing this is how the crate itself picks up a new
/// builtin migration (§4.C).
pub const CURRENT_SCHEMA_VERSION: &str = "1.2";

/// Runs the full `text -> B -> C -> D -> canonical model` pipeline (§3 Data
/// flow) for one config file: load and resolve includes/`env()`, migrate to
/// [`CURRENT_SCHEMA_VERSION`] (builtins plus any `migration` blocks the file
/// itself declares), bind to the typed model, then validate and expand.
pub async fn load_and_validate(path: &camino::Utf8Path) -> Result<CanonicalConfig, Error> {
    let tree = loader::load(path).await?;

    let mut graph = migrate::MigrationGraph::with_builtins();
    graph.extend(migrate::parse_declared(&tree));
    let migrated = graph.apply(tree, CURRENT_SCHEMA_VERSION)?;

    let json = raw::to_json(&migrated);
    let config: Config = serde_json::from_value(json).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    validate::validate(config)
}
