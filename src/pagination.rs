use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{SessionError, ViewError};
use crate::view::{CancelToken, ControlState, PageView, RowHandle};

pub struct PaginationSpec<'a> {
    pub ready_selector: &'a str,
    pub row_selector: &'a str,
    pub control_selector: Option<&'a str>,
    /// Hard bound on the number of clicks.
    pub max_rounds: usize,
    pub settle: Duration,
    pub ready_timeout: Duration,
}

/// Why the "load more" loop stopped. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The control is missing, hidden or disabled.
    Stable(ControlState),
    /// A click did not grow the table.
    Stalled { rows: usize },
    /// `max_rounds` clicks were spent with the control still ready.
    RoundCap { rows: usize },
    /// The view failed mid-loop; rows loaded so far are kept.
    Interrupted(String),
}

impl Termination {
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::Stable(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Stable(state) => write!(f, "exhausted (control {:?})", state),
            Termination::Stalled { rows } => write!(f, "stalled at {} rows", rows),
            Termination::RoundCap { rows } => write!(f, "round cap hit at {} rows", rows),
            Termination::Interrupted(reason) => write!(f, "interrupted: {}", reason),
        }
    }
}

#[derive(Debug)]
pub struct Exhaustion {
    pub rows: Vec<RowHandle>,
    pub rounds: usize,
    pub termination: Termination,
}

/// Click "load more" until the table stops growing, then hand back every row
/// in DOM order.
pub fn exhaust<V: PageView + ?Sized>(
    view: &mut V,
    spec: &PaginationSpec<'_>,
    cancel: &CancelToken,
) -> Result<Exhaustion, SessionError> {
    cancel.check()?;
    view.wait_for(spec.ready_selector, spec.ready_timeout)?;

    let mut rounds = 0;
    let termination = loop {
        match step(view, spec, cancel, rounds) {
            Ok(Step::Grew(rows)) => {
                rounds += 1;
                debug!("round {}: {} rows loaded", rounds, rows);
            }
            Ok(Step::Done(t)) => break t,
            Err(ViewError::Cancelled) => return Err(SessionError::Cancelled),
            Err(e) => break Termination::Interrupted(e.to_string()),
        }
    };

    match &termination {
        Termination::Stable(_) => {}
        Termination::Stalled { rows } => {
            warn!("no new rows after a click; stopping at {} rows", rows)
        }
        Termination::RoundCap { rows } => warn!(
            "pagination hit the {}-round cap; row count frozen at {}",
            spec.max_rounds, rows
        ),
        Termination::Interrupted(reason) => warn!("pagination interrupted: {}", reason),
    }

    let rows: Vec<RowHandle> = view
        .row_markup(spec.row_selector)?
        .into_iter()
        .enumerate()
        .map(|(position, markup)| RowHandle { position, markup })
        .collect();
    info!("{} rows after {} rounds ({})", rows.len(), rounds, termination);

    Ok(Exhaustion {
        rows,
        rounds,
        termination,
    })
}

enum Step {
    Grew(usize),
    Done(Termination),
}

fn step<V: PageView + ?Sized>(
    view: &mut V,
    spec: &PaginationSpec<'_>,
    cancel: &CancelToken,
    rounds: usize,
) -> Result<Step, ViewError> {
    let before = view.count(spec.row_selector)?;

    let Some(control) = spec.control_selector else {
        return Ok(Step::Done(Termination::Stable(ControlState::Missing)));
    };
    let state = view.control_state(control)?;
    if state != ControlState::Ready {
        debug!("control {:?}; pagination exhausted at {} rows", state, before);
        return Ok(Step::Done(Termination::Stable(state)));
    }
    if rounds >= spec.max_rounds {
        return Ok(Step::Done(Termination::RoundCap { rows: before }));
    }

    cancel.check()?;
    view.click(control)?;
    cancel.check()?;
    view.settle(spec.settle)?;

    let after = view.count(spec.row_selector)?;
    if after <= before {
        return Ok(Step::Done(Termination::Stalled { rows: after }));
    }
    Ok(Step::Grew(after))
}
