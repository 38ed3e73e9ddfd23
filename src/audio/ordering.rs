//! Políticas de orden de la cola.
//!
//! Funciones puras: reciben una copia estable de la cola base y devuelven el
//! orden derivado como lista de ids. La cola base nunca se reordena.

use rand::Rng;
use serenity::model::id::UserId;
use std::collections::VecDeque;

use super::track::{TrackContext, TrackId};

/// Vuelve a sortear las claves de las pistas no prioritarias y devuelve
/// el orden resultante. Las prioritarias conservan la clave mínima y, como
/// el ordenamiento es estable, su orden relativo.
pub fn shuffle_order<'a, R, I>(tracks: I, rng: &mut R) -> Vec<TrackId>
where
    R: Rng + ?Sized,
    I: IntoIterator<Item = &'a mut TrackContext>,
{
    let mut keyed: Vec<(i32, TrackId)> = tracks
        .into_iter()
        .map(|track| (track.randomize(rng), track.id()))
        .collect();

    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, id)| id).collect()
}

/// Reparte los turnos entre quienes pidieron pistas.
///
/// `tracks` llega en el orden de la vista de origen (aleatoria si el shuffle
/// está activo). Las pistas prioritarias van primero; el resto se agrupa por
/// usuario en orden de primera aparición y se toma una pista por usuario por
/// vuelta. La rotación empieza por el usuario que sigue a `anchor` (quien pidió
/// la pista que suena); si `anchor` ya no tiene pistas en cola se empieza por
/// el primer usuario.
pub fn round_robin_order<'a, I>(tracks: I, anchor: Option<UserId>) -> Vec<TrackId>
where
    I: IntoIterator<Item = &'a TrackContext>,
{
    let mut order = Vec::new();
    let mut users: Vec<(UserId, VecDeque<TrackId>)> = Vec::new();

    for track in tracks {
        if track.is_priority() {
            order.push(track.id());
            continue;
        }

        match users.iter_mut().find(|(user, _)| *user == track.requester()) {
            Some((_, pending)) => pending.push_back(track.id()),
            None => users.push((track.requester(), VecDeque::from([track.id()]))),
        }
    }

    if users.is_empty() {
        return order;
    }

    let start = anchor
        .and_then(|anchor| users.iter().position(|(user, _)| *user == anchor))
        .map_or(0, |index| (index + 1) % users.len());
    users.rotate_left(start);

    while !users.is_empty() {
        users.retain_mut(|(_, pending)| {
            if let Some(id) = pending.pop_front() {
                order.push(id);
            }
            !pending.is_empty()
        });
    }

    order
}
