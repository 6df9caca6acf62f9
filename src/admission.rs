//! Burst + sustained admission.

use std::{fmt, sync::Arc};

use crate::{ConsumeDecision, RateWindow, RateWindowStore, SubjectId, TaskgateError};

/// Which window rejected a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// The short, low-capacity window.
    Burst,
    /// The long, higher-capacity window.
    Sustained,
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKind::Burst => f.write_str("burst"),
            WindowKind::Sustained => f.write_str("sustained"),
        }
    }
}

/// Admission decision for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Both windows granted a point.
    Accept,
    /// The burst window is exhausted; retry after `delay_ms`.
    RejectBurst {
        /// Time until the burst window (or its block) resets.
        delay_ms: u64,
    },
    /// The sustained window is exhausted; retry after `delay_ms`.
    RejectSustained {
        /// Time until the sustained window resets.
        delay_ms: u64,
    },
}

impl Admission {
    /// The delay and rejecting window, or `None` for [`Admission::Accept`].
    pub fn rejection(&self) -> Option<(WindowKind, u64)> {
        match *self {
            Admission::Accept => None,
            Admission::RejectBurst { delay_ms } => Some((WindowKind::Burst, delay_ms)),
            Admission::RejectSustained { delay_ms } => Some((WindowKind::Sustained, delay_ms)),
        }
    }
}

/// Composes a burst and a sustained [`RateWindow`] over one shared
/// [`RateWindowStore`].
///
/// # Algorithm
///
/// 1. Consume from the burst window. If denied, reject with its delay; the
///    sustained window is not touched.
/// 2. Consume from the sustained window. If denied, reject with its delay.
///    The burst point spent in step 1 is **not** refunded.
/// 3. Accept.
///
/// A store failure in either step surfaces as
/// [`TaskgateError::AdmissionUnavailable`]; it is never turned into an
/// accept or a reject.
pub struct DualAdmissionController {
    store: Arc<dyn RateWindowStore>,
    burst: RateWindow,
    sustained: RateWindow,
}

impl DualAdmissionController {
    /// Create a controller over `store`.
    pub fn new(store: Arc<dyn RateWindowStore>, burst: RateWindow, sustained: RateWindow) -> Self {
        Self {
            store,
            burst,
            sustained,
        }
    }

    /// The burst window.
    pub fn burst(&self) -> &RateWindow {
        &self.burst
    }

    /// The sustained window.
    pub fn sustained(&self) -> &RateWindow {
        &self.sustained
    }

    /// Decide whether `subject` may proceed now.
    pub async fn admit(&self, subject: &SubjectId) -> Result<Admission, TaskgateError> {
        let burst = self.consume(&self.burst, subject).await?;

        if let ConsumeDecision::Denied { ms_before_next } = burst {
            tracing::debug!(subject = %subject, delay_ms = ms_before_next, "admission.reject.burst");
            return Ok(Admission::RejectBurst {
                delay_ms: ms_before_next,
            });
        }

        let sustained = self.consume(&self.sustained, subject).await?;

        if let ConsumeDecision::Denied { ms_before_next } = sustained {
            tracing::debug!(subject = %subject, delay_ms = ms_before_next, "admission.reject.sustained");
            return Ok(Admission::RejectSustained {
                delay_ms: ms_before_next,
            });
        }

        tracing::debug!(subject = %subject, "admission.accept");
        Ok(Admission::Accept)
    } // end method admit

    async fn consume(
        &self,
        window: &RateWindow,
        subject: &SubjectId,
    ) -> Result<ConsumeDecision, TaskgateError> {
        self.store
            .consume(window, subject)
            .await
            .map_err(|err| TaskgateError::AdmissionUnavailable {
                window: window.name().to_string(),
                source: Box::new(err),
            })
    }
}
