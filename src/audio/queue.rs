use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::{
    ordering,
    track::{TrackContext, TrackId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatMode {
    #[default]
    Off,
    Single,
    All,
}

/// Cola de un servidor.
///
/// `tracks` es la única fuente de verdad. Las vistas aleatoria y round-robin
/// son listas de ids derivadas de ella; se reconstruyen de forma perezosa
/// cuando dejan de coincidir con la cola base.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<TrackContext>,
    shuffle_view: Option<Vec<TrackId>>,
    round_robin_view: Option<Vec<TrackId>>,
    shuffle: bool,
    round_robin: bool,
    repeat: RepeatMode,
    last_taken: Option<TrackContext>,
    anchor: Option<UserId>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega una pista: las prioritarias van al frente
    pub fn add(&mut self, track: TrackContext, silent: bool) {
        debug!("➕ Agregado a la cola: {}", track.effective_title());
        if track.is_priority() {
            self.tracks.push_front(track);
        } else {
            self.tracks.push_back(track);
        }

        if !silent {
            self.invalidate_views();
        }
    }

    /// Agrega varias pistas conservando su orden relativo
    pub fn add_all(&mut self, tracks: Vec<TrackContext>, silent: bool) {
        let count = tracks.len();
        let (priority, normal): (Vec<_>, Vec<_>) = tracks.into_iter().partition(|t| t.is_priority());

        for track in priority.into_iter().rev() {
            self.tracks.push_front(track);
        }
        self.tracks.extend(normal);
        debug!("➕ Agregadas {} pistas a la cola", count);

        if !silent {
            self.invalidate_views();
        }
    }

    /// Saca la siguiente pista según la política activa.
    ///
    /// Con repeat SINGLE devuelve la última pista tomada sin tocar la cola.
    /// Con repeat ALL la pista se vuelve a encolar al final, sin prioridad.
    pub fn take(&mut self, silent: bool) -> Option<TrackContext> {
        if self.repeat == RepeatMode::Single {
            if let Some(last) = &self.last_taken {
                return Some(last.clone());
            }
        }

        let position = self.active_order().into_iter().next()?;
        let mut track = self.tracks.remove(position)?;
        self.forget(track.id());

        if self.repeat == RepeatMode::All {
            track.demote();
            let mut again = track.clone();
            again.clear_resume();
            self.add(again, true);
        }

        let mut remembered = track.clone();
        remembered.clear_resume();
        self.last_taken = Some(remembered);
        self.anchor = Some(track.requester());

        if !silent {
            debug!("➡️ Siguiente en cola: {}", track.effective_title());
        }
        Some(track)
    }

    /// Lo que devolvería `take` sin sacarlo de la cola
    pub fn peek(&mut self) -> Option<TrackContext> {
        if self.repeat == RepeatMode::Single {
            if let Some(last) = &self.last_taken {
                return Some(last.clone());
            }
        }

        let position = self.active_order().into_iter().next()?;
        self.tracks.get(position).cloned()
    }

    /// Pistas en `[start, end)` según la política activa
    pub fn get_in_range(&mut self, start: usize, end: usize) -> Vec<TrackContext> {
        if start >= end {
            return Vec::new();
        }

        self.active_order()
            .into_iter()
            .skip(start)
            .take(end - start)
            .filter_map(|position| self.tracks.get(position).cloned())
            .collect()
    }

    /// Toda la cola en el orden en que se reproduciría
    pub fn ordered(&mut self) -> Vec<TrackContext> {
        self.get_in_range(0, self.tracks.len())
    }

    pub fn remove(&mut self, track_id: TrackId, silent: bool) -> Option<TrackContext> {
        let position = self.tracks.iter().position(|t| t.id() == track_id)?;
        let removed = self.tracks.remove(position)?;
        self.forget(track_id);
        debug!("❌ Pista eliminada de la cola: {}", removed.effective_title());

        if !silent {
            self.invalidate_views();
        }
        Some(removed)
    }

    pub fn remove_by_ids(&mut self, track_ids: &[TrackId], silent: bool) -> Vec<TrackContext> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .tracks
            .drain(..)
            .partition(|t| track_ids.contains(&t.id()));
        self.tracks = kept.into();

        for track in &removed {
            self.forget(track.id());
        }
        if !removed.is_empty() {
            debug!("❌ Eliminadas {} pistas de la cola", removed.len());
        }

        if !silent {
            self.invalidate_views();
        }
        removed
    }

    /// Vacía la cola y corta el ciclo de repetición
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.shuffle_view = None;
        self.round_robin_view = None;
        self.last_taken = None;
        self.anchor = None;
        debug!("🗑️ Cola limpiada");
    }

    /// La pista actual se saltó: repeat SINGLE no debe volver a ella
    pub fn on_skipped(&mut self) {
        self.last_taken = None;
    }

    /// `true` si todas las pistas en cola de `user_id` están en `track_ids`
    pub fn is_user_track_owner(&self, user_id: UserId, track_ids: &[TrackId]) -> bool {
        self.tracks
            .iter()
            .filter(|t| t.requester() == user_id)
            .all(|t| track_ids.contains(&t.id()))
    }

    /// Fuerza un nuevo sorteo de la vista aleatoria
    pub fn reshuffle(&mut self) {
        self.invalidate_views();
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
        self.invalidate_views();
    }

    pub fn set_round_robin(&mut self, round_robin: bool) {
        self.round_robin = round_robin;
        self.round_robin_view = None;
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn is_round_robin(&self) -> bool {
        self.round_robin
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// La cola base, sin mezclar
    pub fn iter(&self) -> impl Iterator<Item = &TrackContext> {
        self.tracks.iter()
    }

    pub fn user_track_count(&self, user_id: UserId) -> usize {
        self.tracks.iter().filter(|t| t.requester() == user_id).count()
    }

    /// Las transmisiones en vivo cuentan como 0
    pub fn total_duration_millis(&self) -> u64 {
        self.tracks.iter().filter_map(|t| t.effective_duration()).sum()
    }

    pub fn stream_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_stream()).count()
    }

    // Funciones privadas

    fn invalidate_views(&mut self) {
        self.shuffle_view = None;
        self.round_robin_view = None;
    }

    fn forget(&mut self, track_id: TrackId) {
        for view in [&mut self.shuffle_view, &mut self.round_robin_view].into_iter().flatten() {
            view.retain(|id| *id != track_id);
        }
    }

    /// Índices de `tracks` en el orden de la política activa
    fn active_order(&mut self) -> Vec<usize> {
        if self.round_robin {
            self.ensure_round_robin_view();
            if let Some(positions) = self.round_robin_view.as_deref().and_then(|v| self.positions(v)) {
                return positions;
            }
        } else if self.shuffle {
            self.ensure_shuffle_view();
            if let Some(positions) = self.shuffle_view.as_deref().and_then(|v| self.positions(v)) {
                return positions;
            }
        }

        (0..self.tracks.len()).collect()
    }

    /// Traduce una vista a índices; `None` si ya no corresponde a la cola
    fn positions(&self, view: &[TrackId]) -> Option<Vec<usize>> {
        if view.len() != self.tracks.len() {
            return None;
        }

        let index: HashMap<TrackId, usize> = self
            .tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id(), i))
            .collect();
        view.iter().map(|id| index.get(id).copied()).collect()
    }

    fn ensure_shuffle_view(&mut self) {
        let current = self.shuffle_view.as_deref().and_then(|v| self.positions(v)).is_some();
        if current {
            return;
        }

        let mut rng = rand::thread_rng();
        self.shuffle_view = Some(ordering::shuffle_order(self.tracks.iter_mut(), &mut rng));
        // El round-robin se arma sobre la vista aleatoria
        self.round_robin_view = None;
        debug!("🔀 Vista aleatoria reconstruida ({} pistas)", self.tracks.len());
    }

    fn ensure_round_robin_view(&mut self) {
        let source: Vec<usize> = if self.shuffle {
            self.ensure_shuffle_view();
            match self.shuffle_view.as_deref().and_then(|v| self.positions(v)) {
                Some(positions) => positions,
                None => (0..self.tracks.len()).collect(),
            }
        } else {
            (0..self.tracks.len()).collect()
        };

        let current = self.round_robin_view.as_deref().and_then(|v| self.positions(v)).is_some();
        if current {
            return;
        }

        let order = ordering::round_robin_order(
            source.iter().filter_map(|&position| self.tracks.get(position)),
            self.anchor,
        );
        self.round_robin_view = Some(order);
        debug!("🔁 Vista round-robin reconstruida ({} pistas)", self.tracks.len());
    }
}
