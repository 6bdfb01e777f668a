use thiserror::Error;

/// Erreurs du modèle partagé.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// Couleur qui n'est pas de la forme `#rrggbb`.
    #[error("Couleur invalide : {value} (attendu #rrggbb)")]
    InvalidColor {
        /// Texte refusé.
        value: String,
    },
}
