//! The canonical local table of cars.
//!
//! [`Reconciler`] is the only thing that mutates the table. Snapshots replace
//! it wholesale; claim/release results are upserted by id. Every write carries
//! a [`Seq`] taken when the producing operation started, and a row is skipped
//! if a write with a higher sequence already landed for the same id, so a slow
//! early request cannot clobber a faster later one. A snapshot older than the
//! newest applied snapshot is dropped whole, so removed ids stay removed.

use std::collections::HashMap;

use ffb_shared::Car;

/// Issue-order stamp for a table write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seq(u64);

/// Immutable view of the table handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    /// Bumped on every applied write.
    pub revision: u64,
    /// Rows in server order; upserted ids not yet seen in a snapshot come last.
    pub rows: Vec<Car>,
}

impl TableSnapshot {
    pub fn get(&self, id: &str) -> Option<&Car> {
        self.rows.iter().find(|car| car.id == id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    car: Car,
    seq: Seq,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    revision: u64,
    next_seq: u64,
    /// Seq of the newest snapshot applied so far.
    snapshot_seq: Option<Seq>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp an operation at the moment it starts.
    pub fn next_seq(&mut self) -> Seq {
        self.next_seq += 1;
        Seq(self.next_seq)
    }

    /// Replace the whole table with `rows`.
    ///
    /// Rows whose id already carries a newer write keep that write, and such
    /// ids survive even when `rows` omits them. Everything else not in `rows`
    /// is removed. Duplicate ids keep their first position and last value.
    ///
    /// A snapshot older than the newest one already applied is ignored and
    /// `false` is returned.
    pub fn apply_snapshot(&mut self, rows: Vec<Car>, seq: Seq) -> bool {
        if self.snapshot_seq.is_some_and(|newest| newest > seq) {
            return false;
        }
        self.snapshot_seq = Some(seq);

        let mut previous = std::mem::take(&mut self.entries);
        let previous_order = std::mem::take(&mut self.order);

        for car in rows {
            if let Some(existing) = previous.remove(&car.id) {
                if existing.seq > seq {
                    self.order.push(car.id.clone());
                    self.entries.insert(car.id, existing);
                    continue;
                }
            }
            match self.entries.get_mut(&car.id) {
                Some(entry) => {
                    if entry.seq <= seq {
                        *entry = Entry { car, seq };
                    }
                }
                None => {
                    self.order.push(car.id.clone());
                    self.entries.insert(car.id.clone(), Entry { car, seq });
                }
            }
        }

        for id in previous_order {
            if let Some(existing) = previous.remove(&id) {
                if existing.seq > seq {
                    self.order.push(id.clone());
                    self.entries.insert(id, existing);
                }
            }
        }

        self.revision += 1;
        true
    }

    /// Insert or overwrite one car. Returns `false` when a newer write for the
    /// same id has already been applied.
    pub fn apply_upsert(&mut self, car: Car, seq: Seq) -> bool {
        if let Some(existing) = self.entries.get(&car.id) {
            if existing.seq > seq {
                return false;
            }
        }
        let id = car.id.clone();
        if self.entries.insert(id.clone(), Entry { car, seq }).is_none() {
            self.order.push(id);
        }
        self.revision += 1;
        true
    }

    pub fn get(&self, id: &str) -> Option<&Car> {
        self.entries.get(id).map(|entry| &entry.car)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn rows(&self) -> Vec<Car> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.car.clone())
            .collect()
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            revision: self.revision,
            rows: self.rows(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffb_shared::CarState;

    fn free(id: &str) -> Car {
        Car::new(id, CarState::Free)
    }

    fn reserved(id: &str, user: &str) -> Car {
        Car::new(id, CarState::Reserved).assigned(user).with_ttl(60)
    }

    #[test]
    fn each_snapshot_fully_replaces_the_last() {
        let mut table = Reconciler::new();
        let snapshots = vec![
            vec![free("car-1"), free("car-2"), free("car-3")],
            vec![reserved("car-2", "u1"), free("car-1")],
            vec![],
            vec![Car::new("car-9", CarState::Busy).assigned("u4")],
        ];
        for rows in snapshots {
            let seq = table.next_seq();
            table.apply_snapshot(rows.clone(), seq);
            assert_eq!(table.rows(), rows);
        }
    }

    #[test]
    fn snapshot_preserves_server_order() {
        let mut table = Reconciler::new();
        let seq = table.next_seq();
        table.apply_snapshot(vec![free("car-3"), free("car-1"), free("car-2")], seq);
        let ids: Vec<_> = table.rows().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["car-3", "car-1", "car-2"]);
    }

    #[test]
    fn duplicate_ids_keep_first_position_and_last_value() {
        let mut table = Reconciler::new();
        let seq = table.next_seq();
        table.apply_snapshot(
            vec![free("car-1"), free("car-2"), reserved("car-1", "u1")],
            seq,
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0], reserved("car-1", "u1"));
    }

    #[test]
    fn upsert_inserts_and_overwrites() {
        let mut table = Reconciler::new();
        let seq = table.next_seq();
        table.apply_snapshot(vec![free("car-1")], seq);

        let seq = table.next_seq();
        assert!(table.apply_upsert(reserved("car-1", "u1"), seq));
        assert_eq!(table.get("car-1"), Some(&reserved("car-1", "u1")));

        let seq = table.next_seq();
        assert!(table.apply_upsert(free("car-2"), seq));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn older_upsert_loses_to_newer_one() {
        let mut table = Reconciler::new();
        let claim = table.next_seq();
        let release = table.next_seq();

        assert!(table.apply_upsert(free("car-1"), release));
        assert!(!table.apply_upsert(reserved("car-1", "u1"), claim));
        assert_eq!(table.get("car-1"), Some(&free("car-1")));
    }

    #[test]
    fn stale_reload_does_not_clobber_newer_claim() {
        let mut table = Reconciler::new();
        let seq = table.next_seq();
        table.apply_snapshot(vec![free("car-1"), free("car-2")], seq);

        let reload = table.next_seq();
        let claim = table.next_seq();
        assert!(table.apply_upsert(reserved("car-1", "u1"), claim));

        // The reload was issued before the claim and reflects the old server state.
        table.apply_snapshot(vec![free("car-1"), free("car-2")], reload);
        assert_eq!(table.get("car-1"), Some(&reserved("car-1", "u1")));
        assert_eq!(table.get("car-2"), Some(&free("car-2")));
    }

    #[test]
    fn newer_write_survives_omission_from_older_snapshot() {
        let mut table = Reconciler::new();
        let reload = table.next_seq();
        let claim = table.next_seq();
        table.apply_upsert(reserved("car-5", "u1"), claim);

        table.apply_snapshot(vec![free("car-1")], reload);
        let ids: Vec<_> = table.rows().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["car-1", "car-5"]);
    }

    #[test]
    fn stale_reload_cannot_restore_removed_ids() {
        let mut table = Reconciler::new();
        let seq = table.next_seq();
        table.apply_snapshot(vec![free("car-1"), free("car-x")], seq);

        let reload = table.next_seq();
        let pushed = table.next_seq();
        assert!(table.apply_snapshot(vec![free("car-1")], pushed));
        let revision = table.revision();

        assert!(!table.apply_snapshot(vec![free("car-1"), free("car-x")], reload));
        assert_eq!(table.rows(), vec![free("car-1")]);
        assert_eq!(table.revision(), revision);
    }

    #[test]
    fn newer_snapshot_removes_omitted_ids() {
        let mut table = Reconciler::new();
        let seq = table.next_seq();
        table.apply_upsert(reserved("car-5", "u1"), seq);

        let seq = table.next_seq();
        table.apply_snapshot(vec![free("car-1")], seq);
        assert_eq!(table.get("car-5"), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn revision_moves_on_every_applied_write() {
        let mut table = Reconciler::new();
        assert_eq!(table.revision(), 0);
        let seq = table.next_seq();
        table.apply_snapshot(vec![free("car-1")], seq);
        assert_eq!(table.revision(), 1);

        let old = Seq(0);
        table.apply_upsert(free("car-1"), old);
        assert_eq!(table.revision(), 1);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.get("car-1"), Some(&free("car-1")));
    }
}
