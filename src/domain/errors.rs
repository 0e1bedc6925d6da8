/// Conditions under which an import must not start. Nothing is mutated when
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("no unique key column is configured in the rules table")]
    NoUniqueKey,
    #[error("no target table is selected")]
    NoTargetTable,
    #[error("the source sheet is empty or only has headers")]
    EmptySource,
    #[error("no source column matches a column of the target table")]
    NoMappedColumns,
    #[error("unique key `{0}` does not match any column of the target table")]
    UnknownKeyColumn(String),
}
