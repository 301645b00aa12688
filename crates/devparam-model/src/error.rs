use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("metadata document '{scope}' is not valid JSON: {source}")]
    Parse {
        scope: String,
        source: serde_json::Error,
    },

    #[error("include cycle involving {kind} '{name}'")]
    IncludeCycle { kind: &'static str, name: String },

    #[error("{kind} '{name}' declared more than once")]
    DuplicateName { kind: &'static str, name: String },

    #[error("parameter {id} ('{path}') redefined without an override")]
    ConflictingDefinition { id: u32, path: String },

    #[error("unknown include '{include}' in {kind} '{name}'")]
    UnknownInclude {
        kind: &'static str,
        name: String,
        include: String,
    },
}
