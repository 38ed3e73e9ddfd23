//! # Monitoring
//!
//! Contadores del engine: rechazos de la cola por límite, pistas iniciadas,
//! fallos de carga y actividad de oyentes por día (solo los últimos
//! [`LISTENER_WINDOW_DAYS`] días). Solo sirven para observación; ninguna
//! decisión del engine depende de ellos.

use chrono::{Datelike, Utc};
use dashmap::DashMap;
use serenity::model::id::UserId;
use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicI32, AtomicU64, Ordering},
};

/// Días de actividad que se conservan por oyente
pub const LISTENER_WINDOW_DAYS: i32 = 30;

#[derive(Debug, Default)]
pub struct Metrics {
    queue_prevented: DashMap<&'static str, AtomicU64>,
    tracks_started: AtomicU64,
    load_failures: AtomicU64,
    listener_days: DashMap<UserId, BTreeSet<i32>>,
    /// Último día en que se podaron los días viejos
    pruned_day: AtomicI32,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Un límite de la cola rechazó una pista
    pub fn queue_prevented(&self, limit: &'static str) {
        self.queue_prevented
            .entry(limit)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_prevented_count(&self, limit: &str) -> u64 {
        self.queue_prevented
            .get(limit)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    pub fn track_started(&self) {
        self.tracks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tracks_started(&self) -> u64 {
        self.tracks_started.load(Ordering::Relaxed)
    }

    pub fn load_failed(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    /// Registra que `user_id` escuchó música hoy
    pub fn log_listener(&self, user_id: UserId) {
        self.log_listener_on(user_id, Utc::now().num_days_from_ce());
    }

    fn log_listener_on(&self, user_id: UserId, day: i32) {
        // Una poda por día: fuera los días viejos y los oyentes sin días
        if self.pruned_day.swap(day, Ordering::Relaxed) != day {
            let oldest = day - LISTENER_WINDOW_DAYS;
            self.listener_days.retain(|_, days| {
                days.retain(|d| *d > oldest);
                !days.is_empty()
            });
        }
        self.listener_days.entry(user_id).or_default().insert(day);
    }

    /// Oyentes distintos registrados en el día `day` (días desde la era común)
    pub fn listeners_on(&self, day: i32) -> usize {
        self.listener_days
            .iter()
            .filter(|entry| entry.value().contains(&day))
            .count()
    }

    pub fn listeners_today(&self) -> usize {
        self.listeners_on(Utc::now().num_days_from_ce())
    }
}
