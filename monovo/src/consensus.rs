use crate::VoSettings;
use log::*;
use monovo_core::sample_consensus::{Consensus, Estimator, Model};
use rand::{seq::index, Rng, SeedableRng};
use rand_pcg::Pcg64;

/// Plain RANSAC with a fixed trial budget.
///
/// Every trial draws a minimal sample, fits it, and scores all of the data against each fitted
/// model. A datum is an inlier when its residual is strictly below the threshold. The model with
/// the most inliers wins, ties going to the lower summed inlier residual. The winner is then refit
/// on all of its inliers, and the refit is kept if it does not lose inliers.
///
/// Sampling is driven by `R`, so seeding it makes the whole estimate deterministic.
#[derive(Clone, Debug)]
pub struct Ransac<R> {
    threshold: f64,
    trials: usize,
    rng: R,
}

impl<R> Ransac<R>
where
    R: Rng,
{
    /// Creates RANSAC with 100 trials.
    pub fn new(threshold: f64, rng: R) -> Self {
        Self {
            threshold,
            trials: 100,
            rng,
        }
    }

    /// Set the number of minimal samples to try.
    #[must_use]
    pub fn trials(self, trials: usize) -> Self {
        Self { trials, ..self }
    }

    fn score<M, Data>(&self, model: &M, data: &[Data]) -> (Vec<usize>, f64)
    where
        M: Model<Data>,
    {
        let mut total = 0.0;
        let inliers = data
            .iter()
            .enumerate()
            .filter_map(|(ix, datum)| {
                let residual = model.residual(datum);
                if residual < self.threshold {
                    total += residual;
                    Some(ix)
                } else {
                    None
                }
            })
            .collect();
        (inliers, total)
    }
}

impl Ransac<Pcg64> {
    /// Creates RANSAC with the threshold, trial count and seed from the settings.
    pub fn from_settings(settings: &VoSettings) -> Self {
        Self::new(
            settings.consensus_threshold,
            Pcg64::seed_from_u64(settings.consensus_seed),
        )
        .trials(settings.consensus_trials)
    }
}

fn better(inliers: usize, residual: f64, best: Option<(usize, f64)>) -> bool {
    match best {
        None => inliers > 0,
        Some((best_inliers, best_residual)) => {
            inliers > best_inliers || (inliers == best_inliers && residual < best_residual)
        }
    }
}

impl<E, R, Data> Consensus<E, Data> for Ransac<R>
where
    E: Estimator<Data>,
    R: Rng,
    Data: Clone,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.model_inliers(estimator, data).map(|(model, _)| model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = Data> + Clone,
    {
        let data: Vec<Data> = data.collect();
        if data.len() < E::MIN_SAMPLES {
            debug!(
                "cannot sample {} of {} data points",
                E::MIN_SAMPLES,
                data.len()
            );
            return None;
        }

        let mut best: Option<(E::Model, Vec<usize>, f64)> = None;
        for _ in 0..self.trials {
            let sample = index::sample(&mut self.rng, data.len(), E::MIN_SAMPLES).into_vec();
            for model in estimator.estimate(sample.iter().map(|&ix| data[ix].clone())) {
                let (inliers, residual) = self.score(&model, &data);
                let current = best
                    .as_ref()
                    .map(|(_, inliers, residual)| (inliers.len(), *residual));
                if better(inliers.len(), residual, current) {
                    best = Some((model, inliers, residual));
                }
            }
        }

        let (model, inliers, residual) = best?;
        debug!(
            "best sampled model has {} inliers out of {}",
            inliers.len(),
            data.len()
        );
        if inliers.len() < E::MIN_SAMPLES {
            return Some((model, inliers));
        }

        let mut refit_best: Option<(E::Model, Vec<usize>, f64)> = None;
        for refit in estimator.estimate(inliers.iter().map(|&ix| data[ix].clone())) {
            let (refit_inliers, refit_residual) = self.score(&refit, &data);
            let current = refit_best
                .as_ref()
                .map(|(_, inliers, residual)| (inliers.len(), *residual));
            if refit_inliers.len() >= inliers.len()
                && better(refit_inliers.len(), refit_residual, current)
            {
                refit_best = Some((refit, refit_inliers, refit_residual));
            }
        }

        Some(match refit_best {
            Some((refit, refit_inliers, _)) => {
                trace!("refit on all inliers kept {} inliers", refit_inliers.len());
                (refit, refit_inliers)
            }
            None => {
                trace!(
                    "refit on all inliers was worse, summed residual stays {}",
                    residual
                );
                (model, inliers)
            }
        })
    }
}
