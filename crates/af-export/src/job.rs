use std::fmt;

use af_core::traits::MediaSource;

use crate::error::ExportError;

/// Type de job d'export de longue durée.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportKind {
    AnimatedPalette,
    MuxedMedia,
    LiveCapture,
}

impl ExportKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::AnimatedPalette => "GIF",
            Self::MuxedMedia => "HQ",
            Self::LiveCapture => "REC",
        }
    }

    /// Extension du fichier produit.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::AnimatedPalette => "gif",
            Self::MuxedMedia => "mp4",
            Self::LiveCapture => "webm",
        }
    }
}

/// Problème récupérable absorbé par un repli documenté.
#[derive(Clone, Debug, PartialEq)]
pub enum Degradation {
    /// Pas de notification de fin de seek dans le délai : la frame courante est utilisée.
    SeekTimeout { timestamp: f64 },
    /// La quantification n'a produit aucune couleur : palette noire à une entrée.
    EmptyPalette { frame: u32 },
    /// Décodage audio impossible : export vidéo seule.
    AudioUnavailable(String),
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeekTimeout { timestamp } => write!(f, "seek timeout à {timestamp:.3}s"),
            Self::EmptyPalette { frame } => write!(f, "palette vide (frame {frame})"),
            Self::AudioUnavailable(reason) => write!(f, "audio indisponible : {reason}"),
        }
    }
}

/// Issue terminale d'un job.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Success(Vec<u8>),
    Failed(String),
    Cancelled,
}

/// État observable d'un job d'export : compteur, progression monotone,
/// libellé d'état, dégradations et issue terminale.
///
/// # Example
/// ```
/// use af_export::job::{ExportJob, ExportKind, Outcome};
/// let mut job = ExportJob::new(ExportKind::AnimatedPalette, 4);
/// job.frame_done();
/// assert_eq!(job.progress(), 25);
/// job.finish(Outcome::Success(vec![1, 2]));
/// assert!(job.is_finished());
/// ```
#[derive(Debug)]
pub struct ExportJob {
    kind: ExportKind,
    frame: u32,
    total: u32,
    progress: u8,
    status: String,
    degradations: Vec<Degradation>,
    outcome: Option<Outcome>,
}

impl ExportJob {
    #[must_use]
    pub fn new(kind: ExportKind, total: u32) -> Self {
        Self {
            kind,
            frame: 0,
            total,
            progress: 0,
            status: String::from("démarrage"),
            degradations: Vec::new(),
            outcome: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ExportKind {
        self.kind
    }

    /// Frames traitées.
    #[must_use]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Estimation du nombre total de frames (0 si inconnu).
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Progression 0–100, jamais décroissante.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    #[must_use]
    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Consomme le job et rend son issue.
    #[must_use]
    pub fn into_outcome(self) -> Option<Outcome> {
        self.outcome
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    /// Une frame de plus traitée ; progression = `round(100 * frames / total)`.
    pub fn frame_done(&mut self) {
        self.frame += 1;
        if self.total > 0 {
            let pct = (100.0 * f64::from(self.frame) / f64::from(self.total)).round();
            self.set_progress(pct.min(100.0) as u8);
        }
    }

    /// Ne fait jamais reculer la progression.
    pub fn set_progress(&mut self, pct: u8) {
        self.progress = self.progress.max(pct.min(100));
    }

    pub fn degrade(&mut self, degradation: Degradation) {
        log::warn!("[{}] dégradé : {degradation}", self.kind.label());
        self.degradations.push(degradation);
    }

    /// Fixe l'issue terminale. Un job terminé ne change plus d'issue.
    pub fn finish(&mut self, outcome: Outcome) {
        if self.outcome.is_some() {
            return;
        }
        match &outcome {
            Outcome::Success(bytes) => {
                self.set_progress(100);
                self.status = String::from("terminé");
                log::info!(
                    "[{}] terminé : {} frames, {} octets",
                    self.kind.label(),
                    self.frame,
                    bytes.len()
                );
            }
            Outcome::Failed(reason) => {
                self.status = format!("échec : {reason}");
                log::error!("[{}] échec : {reason}", self.kind.label());
            }
            Outcome::Cancelled => {
                self.status = String::from("annulé");
                log::info!("[{}] annulé", self.kind.label());
            }
        }
        self.outcome = Some(outcome);
    }
}

/// Résultat d'un pas de travail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

/// Job exécuté par pas bornés sur l'ordonnanceur coopératif.
///
/// `step` n'échoue pas : une erreur fait passer le job en `Failed` après
/// le nettoyage, puis `step` rend `Done`.
pub trait ExportTask {
    fn job(&self) -> &ExportJob;

    /// Un pas de travail borné (un frame, un chunk audio, une finalisation).
    fn step(&mut self, source: &mut dyn MediaSource) -> Step;

    /// Demande d'arrêt coopératif, prise en compte au prochain `step`.
    fn request_stop(&mut self);

    fn into_job(self: Box<Self>) -> ExportJob;
}

/// Enchaîne les pas jusqu'à l'issue, en rendant la main entre deux pas.
pub fn run_to_end(mut task: Box<dyn ExportTask>, source: &mut dyn MediaSource) -> ExportJob {
    while task.step(source) == Step::Continue {
        std::thread::yield_now();
    }
    task.into_job()
}

/// Emplacement unique de job : au plus un export actif.
///
/// # Example
/// ```
/// use af_export::job::JobSlot;
/// let slot = JobSlot::default();
/// assert!(slot.active().is_none());
/// ```
#[derive(Default)]
pub struct JobSlot {
    task: Option<Box<dyn ExportTask>>,
}

impl JobSlot {
    /// Démarre un job si l'emplacement est libre. `start` n'est pas appelé
    /// quand un job est déjà actif.
    ///
    /// # Errors
    /// `PreconditionUnmet` si un job est actif, sinon l'erreur de `start`.
    pub fn start<F>(&mut self, start: F) -> Result<(), ExportError>
    where
        F: FnOnce() -> Result<Box<dyn ExportTask>, ExportError>,
    {
        if let Some(task) = &self.task {
            return Err(ExportError::precondition(format!(
                "un export {} est déjà en cours",
                task.job().kind().label()
            )));
        }
        let task = start()?;
        log::info!("[{}] démarré", task.job().kind().label());
        self.task = Some(task);
        Ok(())
    }

    /// Job actif, pour l'affichage de la progression.
    #[must_use]
    pub fn active(&self) -> Option<&ExportJob> {
        self.task.as_ref().map(|t| t.job())
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.task.is_some()
    }

    /// Un pas du job actif. Rend le job terminé et libère l'emplacement.
    pub fn tick(&mut self, source: &mut dyn MediaSource) -> Option<ExportJob> {
        let step = self.task.as_mut()?.step(source);
        match step {
            Step::Continue => None,
            Step::Done => self.task.take().map(|t| t.into_job()),
        }
    }

    /// Demande l'arrêt du job actif (stop d'enregistrement, annulation d'un export).
    pub fn request_stop(&mut self) {
        if let Some(task) = self.task.as_mut() {
            task.request_stop();
        }
    }
}
