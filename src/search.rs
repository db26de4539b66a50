use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::hyperparameters::{GridSpace, Hyperparameters, RandomSpace};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trial {
    pub index: usize,
    pub params: Hyperparameters,
    /// Validation accuracy reported by the objective.
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub trials: Vec<Trial>,
    pub best: Trial,
}

/// Runs `objective` once per grid point, epochs outer and learning rate inner.
pub fn grid_search<F>(space: &GridSpace, objective: F) -> Result<SearchOutcome>
where
    F: FnMut(usize, &Hyperparameters) -> Result<f64>,
{
    run_trials(space.candidates(), objective)
}

/// Draws `n_trials` independent candidates from `space` and evaluates each.
pub fn random_search<R, F>(space: &RandomSpace, n_trials: usize, rng: &mut R, objective: F) -> Result<SearchOutcome>
where
    R: Rng + ?Sized,
    F: FnMut(usize, &Hyperparameters) -> Result<f64>,
{
    let candidates = (0..n_trials)
        .map(|_| space.sample(rng))
        .collect::<Result<Vec<_>>>()?;
    run_trials(candidates, objective)
}

fn run_trials<F>(candidates: Vec<Hyperparameters>, mut objective: F) -> Result<SearchOutcome>
where
    F: FnMut(usize, &Hyperparameters) -> Result<f64>,
{
    if candidates.is_empty() {
        return Err(Error::EmptySearchSpace);
    }

    let total = candidates.len();
    let mut trials = Vec::with_capacity(total);
    let mut best: Option<Trial> = None;
    for (index, params) in candidates.into_iter().enumerate() {
        info!(
            trial = index + 1,
            total,
            learning_rate = params.learning_rate,
            epochs = params.epochs,
            batch_size = params.batch_size,
            momentum = params.momentum,
            "starting trial"
        );
        let accuracy = objective(index, &params)?;
        info!(trial = index + 1, accuracy, "trial finished");

        let trial = Trial { index, params, accuracy };
        // strictly greater: the first of equal maxima is kept
        if best.map_or(true, |b| accuracy > b.accuracy) {
            best = Some(trial);
        }
        trials.push(trial);
    }

    let best = best.ok_or(Error::EmptySearchSpace)?;
    info!(
        trial = best.index + 1,
        accuracy = best.accuracy,
        learning_rate = best.params.learning_rate,
        epochs = best.params.epochs,
        "best trial"
    );
    Ok(SearchOutcome { trials, best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_empty_grid_is_an_error() {
        let grid = GridSpace {
            epochs: vec![],
            ..GridSpace::default()
        };
        let result = grid_search(&grid, |_, _| Ok(1.0));
        assert!(matches!(result, Err(Error::EmptySearchSpace)));
    }

    #[test]
    fn test_objective_error_stops_search() {
        let grid = GridSpace::default();
        let mut calls = 0;
        let result = grid_search(&grid, |i, _| {
            calls += 1;
            if i == 1 {
                Err(Error::NonFiniteLoss { epoch: 1 })
            } else {
                Ok(0.5)
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_random_search_runs_requested_trials() {
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = random_search(&RandomSpace::default(), 3, &mut rng, |i, _| Ok(i as f64)).unwrap();
        assert_eq!(outcome.trials.len(), 3);
        assert_eq!(outcome.best.index, 2);
    }

    #[test]
    fn test_zero_random_trials_is_an_error() {
        let mut rng = StdRng::seed_from_u64(5);
        let result = random_search(&RandomSpace::default(), 0, &mut rng, |_, _| Ok(1.0));
        assert!(matches!(result, Err(Error::EmptySearchSpace)));
    }
}
