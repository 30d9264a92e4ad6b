/// Errors raised while constructing a request envelope or its store updates.
///
/// These are programming errors on the caller side (a malformed instruction,
/// contradictory outcome data). Network and business outcomes never surface
/// as an `EnvelopeError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// A store update targets an empty key.
    #[error("store update has an empty key")]
    EmptyKey,

    /// A `mergecollection` member does not belong to the collection.
    #[error("collection member '{member}' does not start with collection key '{collection}'")]
    ForeignCollectionMember { collection: String, member: String },

    /// A `mergecollection` payload is not a JSON object.
    #[error("collection merge for '{collection}' must carry an object value")]
    CollectionNotObject { collection: String },

    /// `finallyData` was supplied together with `successData`/`failureData`.
    #[error("finallyData cannot be combined with successData or failureData")]
    AmbiguousOutcomeData,

    /// The command name is empty.
    #[error("request command is empty")]
    EmptyCommand,

    /// A caller parameter collides with a name the dispatcher sets itself.
    #[error("parameter '{0}' is reserved by the dispatcher")]
    ReservedParameter(String),
}
