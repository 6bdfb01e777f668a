use thiserror::Error;

/// Erreurs d'export.
///
/// `PreconditionUnmet` est rendu par le démarrage d'un job, qui n'entre alors
/// jamais en cours. Les autres variantes font passer un job en échec ; les
/// dégradations récupérables ne sont pas des erreurs (voir
/// [`Degradation`](crate::job::Degradation)).
#[derive(Error, Debug)]
pub enum ExportError {
    /// Capability, source or geometry missing before the job starts.
    #[error("Précondition non remplie : {0}")]
    PreconditionUnmet(String),

    /// The encoder rejected a frame, a chunk or a flush.
    #[error("Erreur encodeur : {0}")]
    Encoder(String),

    /// The container writer rejected a track, a packet or finalization.
    #[error("Erreur conteneur : {0}")]
    Container(String),

    /// Unrecoverable failure.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl ExportError {
    /// Raccourci pour `PreconditionUnmet`.
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionUnmet(reason.into())
    }
}
