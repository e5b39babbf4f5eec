//! Stopping conditions of the search loop.
//!
//! Each condition tracks a current value against a limit. The search ends as
//! soon as any of them is finished.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::schema::{StopReason, StoppingConfig};

/// A single stopping predicate fed by search events.
pub trait StoppingCondition: Send {
    fn reason(&self) -> StopReason;
    fn current_value(&self) -> u64;
    /// Zero when the condition has no numeric budget.
    fn limit(&self) -> u64;
    fn is_finished(&self) -> bool;
    fn reset(&mut self);

    fn on_search_started(&mut self) {}
    fn on_iteration(&mut self) {}
    fn on_fitness_evaluation(&mut self) {}
    fn on_best_fitness(&mut self, _fitness: f64) {}
}

#[derive(Debug, Clone)]
pub struct MaxGenerations {
    limit: u64,
    current: u64,
}

impl MaxGenerations {
    pub fn new(limit: u64) -> Self {
        Self { limit, current: 0 }
    }
}

impl StoppingCondition for MaxGenerations {
    fn reason(&self) -> StopReason {
        StopReason::MaxGenerations
    }

    fn current_value(&self) -> u64 {
        self.current
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn is_finished(&self) -> bool {
        self.current >= self.limit
    }

    fn reset(&mut self) {
        self.current = 0;
    }

    fn on_iteration(&mut self) {
        self.current += 1;
    }
}

/// Wall-clock budget in seconds, measured from search start.
#[derive(Debug, Clone)]
pub struct MaxTime {
    limit_secs: u64,
    started: Option<Instant>,
}

impl MaxTime {
    pub fn new(limit_secs: u64) -> Self {
        Self {
            limit_secs,
            started: None,
        }
    }

    fn elapsed_secs_f64(&self) -> f64 {
        self.started.map_or(0.0, |s| s.elapsed().as_secs_f64())
    }
}

impl StoppingCondition for MaxTime {
    fn reason(&self) -> StopReason {
        StopReason::MaxTime
    }

    fn current_value(&self) -> u64 {
        self.elapsed_secs_f64() as u64
    }

    fn limit(&self) -> u64 {
        self.limit_secs
    }

    fn is_finished(&self) -> bool {
        self.started.is_some() && self.elapsed_secs_f64() >= self.limit_secs as f64
    }

    fn reset(&mut self) {
        self.started = None;
    }

    fn on_search_started(&mut self) {
        self.started = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct MaxFitnessEvaluations {
    limit: u64,
    current: u64,
}

impl MaxFitnessEvaluations {
    pub fn new(limit: u64) -> Self {
        Self { limit, current: 0 }
    }
}

impl StoppingCondition for MaxFitnessEvaluations {
    fn reason(&self) -> StopReason {
        StopReason::MaxEvaluations
    }

    fn current_value(&self) -> u64 {
        self.current
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn is_finished(&self) -> bool {
        self.current >= self.limit
    }

    fn reset(&mut self) {
        self.current = 0;
    }

    fn on_fitness_evaluation(&mut self) {
        self.current += 1;
    }
}

/// Finished once the best suite covers every goal.
#[derive(Debug, Clone, Default)]
pub struct ZeroFitness {
    best: Option<f64>,
}

impl StoppingCondition for ZeroFitness {
    fn reason(&self) -> StopReason {
        StopReason::ZeroFitness
    }

    fn current_value(&self) -> u64 {
        0
    }

    fn limit(&self) -> u64 {
        0
    }

    fn is_finished(&self) -> bool {
        self.best == Some(0.0)
    }

    fn reset(&mut self) {
        self.best = None;
    }

    fn on_best_fitness(&mut self, fitness: f64) {
        self.best = Some(fitness);
    }
}

/// Observes an abort flag set from outside the search.
#[derive(Debug, Clone)]
pub struct ExternalInterrupt {
    flag: Arc<AtomicBool>,
}

impl ExternalInterrupt {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }
}

impl StoppingCondition for ExternalInterrupt {
    fn reason(&self) -> StopReason {
        StopReason::Cancelled
    }

    fn current_value(&self) -> u64 {
        0
    }

    fn limit(&self) -> u64 {
        0
    }

    fn is_finished(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn reset(&mut self) {}
}

/// All active conditions of one run.
pub struct StoppingConditions {
    conditions: Vec<Box<dyn StoppingCondition>>,
}

impl StoppingConditions {
    pub fn new(conditions: Vec<Box<dyn StoppingCondition>>) -> Self {
        Self { conditions }
    }

    /// Conditions for the configured limits plus the interrupt flag.
    pub fn from_config(config: &StoppingConfig, interrupt: Arc<AtomicBool>) -> Self {
        let mut conditions: Vec<Box<dyn StoppingCondition>> =
            vec![Box::new(ExternalInterrupt::new(interrupt))];
        if let Some(limit) = config.max_generations {
            conditions.push(Box::new(MaxGenerations::new(limit)));
        }
        if let Some(limit) = config.max_time_secs {
            conditions.push(Box::new(MaxTime::new(limit)));
        }
        if let Some(limit) = config.max_evaluations {
            conditions.push(Box::new(MaxFitnessEvaluations::new(limit)));
        }
        if config.stop_at_zero_fitness {
            conditions.push(Box::new(ZeroFitness::default()));
        }
        Self::new(conditions)
    }

    /// Reason of the first finished condition, in registration order.
    pub fn is_finished(&self) -> Option<StopReason> {
        self.conditions
            .iter()
            .find(|c| c.is_finished())
            .map(|c| c.reason())
    }

    /// Sum of current values over sum of limits, for conditions with a
    /// nonzero limit.
    pub fn progress(&self) -> f64 {
        let (current, limit) = self
            .conditions
            .iter()
            .filter(|c| c.limit() > 0)
            .fold((0u64, 0u64), |(current, limit), c| {
                (current + c.current_value(), limit + c.limit())
            });
        if limit == 0 {
            0.0
        } else {
            current as f64 / limit as f64
        }
    }

    pub fn reset(&mut self) {
        self.conditions.iter_mut().for_each(|c| c.reset());
    }

    pub fn search_started(&mut self) {
        self.conditions.iter_mut().for_each(|c| c.on_search_started());
    }

    pub fn iteration(&mut self) {
        self.conditions.iter_mut().for_each(|c| c.on_iteration());
    }

    pub fn fitness_evaluation(&mut self) {
        self.conditions
            .iter_mut()
            .for_each(|c| c.on_fitness_evaluation());
    }

    pub fn best_fitness(&mut self, fitness: f64) {
        self.conditions
            .iter_mut()
            .for_each(|c| c.on_best_fitness(fitness));
    }
}
