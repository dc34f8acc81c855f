/**
 * DEVICE TABLE - État partagé des capteurs de la parcelle
 *
 * RÔLE :
 * Unique propriétaire de l'état mutable partagé : id device -> dernière mesure connue.
 *
 * FONCTIONNEMENT :
 * - Initialisée une fois depuis le seed (coordonnées + groupe figés)
 * - Écrite uniquement par l'ingestor (apply_update, une ligne à la fois)
 * - Lue par les handlers HTTP via snapshot() : copie complète, jamais de référence
 *
 * CONCURRENCE :
 * RwLock parking_lot : les snapshots se partagent le verrou en lecture,
 * une mise à jour prend le verrou en écriture le temps d'écrire 3 champs.
 * Un snapshot correspond donc toujours à un état réel entre deux updates.
 */

use crate::models::{Device, DeviceId, DeviceUpdate};
use crate::state::{new_state, Shared};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TableError {
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),
    #[error("duplicate device id in seed: {0}")]
    DuplicateDevice(DeviceId),
}

#[derive(Clone)]
pub struct DeviceTable {
    rows: Shared<BTreeMap<DeviceId, Device>>,
}

impl DeviceTable {
    pub fn from_seed<I>(seed: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = Device>,
    {
        let mut rows = BTreeMap::new();
        for device in seed {
            let id = device.id;
            if rows.insert(id, device).is_some() {
                return Err(TableError::DuplicateDevice(id));
            }
        }
        Ok(Self { rows: new_state(rows) })
    }

    /// Applique une mesure sur un device connu et retourne la ligne à jour.
    /// Un id inconnu ne touche pas la table.
    pub fn apply_update(&self, id: DeviceId, update: &DeviceUpdate) -> Result<Device, TableError> {
        let mut rows = self.rows.write();
        let device = rows.get_mut(&id).ok_or(TableError::UnknownDevice(id))?;

        if let Some(t) = update.temperature {
            device.temperature = t;
        }
        if let Some(m) = update.moisture {
            device.moisture = m;
        }
        if let Some(ts) = update.timestamp {
            device.timestamp = Some(ts);
        }
        Ok(device.clone())
    }

    /// Copie indépendante de toutes les lignes, triées par id
    pub fn snapshot(&self) -> Vec<Device> {
        self.rows.read().values().cloned().collect()
    }

    pub fn get(&self, id: DeviceId) -> Option<Device> {
        self.rows.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn device(id: DeviceId, group: &str, moisture: f64) -> Device {
        Device {
            id,
            name: format!("Location {id}"),
            latitude: 40.0,
            longitude: -3.5,
            group: group.to_string(),
            temperature: 20.0,
            moisture,
            timestamp: None,
        }
    }

    #[test]
    fn test_apply_update_known_device() {
        let table = DeviceTable::from_seed(vec![device(1, "Farmer A", 40.0)]).unwrap();
        let update = DeviceUpdate { temperature: Some(25.5), moisture: Some(12.0), timestamp: Some(1700.0) };

        let row = table.apply_update(1, &update).unwrap();
        assert_eq!(row.temperature, 25.5);
        assert_eq!(row.moisture, 12.0);
        assert_eq!(row.timestamp, Some(1700.0));
        assert_eq!(table.get(1), Some(row));
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let table = DeviceTable::from_seed(vec![device(1, "Farmer A", 40.0)]).unwrap();
        table.apply_update(1, &DeviceUpdate::moisture(35.0)).unwrap();

        let row = table.get(1).unwrap();
        assert_eq!(row.moisture, 35.0);
        assert_eq!(row.temperature, 20.0);
        assert_eq!(row.timestamp, None);
        assert_eq!(row.group, "Farmer A");
    }

    #[test]
    fn test_unknown_device_leaves_table_unchanged() {
        let table = DeviceTable::from_seed(vec![device(1, "Farmer A", 40.0)]).unwrap();
        let before = table.snapshot();

        let err = table.apply_update(99, &DeviceUpdate::moisture(5.0)).unwrap_err();
        assert_eq!(err, TableError::UnknownDevice(99));
        assert_eq!(table.snapshot(), before);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_seed_rejected() {
        let result = DeviceTable::from_seed(vec![device(1, "A", 40.0), device(1, "B", 20.0)]);
        assert_eq!(result.err(), Some(TableError::DuplicateDevice(1)));
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let table = DeviceTable::from_seed(vec![device(1, "Farmer A", 40.0)]).unwrap();
        let snap = table.snapshot();
        table.apply_update(1, &DeviceUpdate::moisture(10.0)).unwrap();

        assert_eq!(snap[0].moisture, 40.0);
        assert_eq!(table.snapshot()[0].moisture, 10.0);
    }

    #[test]
    fn test_snapshot_ordered_by_id() {
        let table = DeviceTable::from_seed(vec![
            device(3, "Farmer C", 40.0),
            device(1, "Farmer A", 40.0),
            device(2, "Farmer A", 40.0),
        ])
        .unwrap();
        assert_eq!(table.snapshot().iter().map(|d| d.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_concurrent_snapshots_never_see_torn_rows() {
        // Chaque écriture met la même valeur dans les 3 champs : une ligne
        // déchirée aurait des champs différents.
        let seed = (1..=8).map(|id| device(id, "G", 0.0)).map(|mut d| {
            d.temperature = 0.0;
            d.timestamp = Some(0.0);
            d
        });
        let table = DeviceTable::from_seed(seed).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let table = table.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for i in 1..=5_000u32 {
                    let v = i as f64;
                    let id = (i % 8) + 1;
                    let update = DeviceUpdate { temperature: Some(v), moisture: Some(v), timestamp: Some(v) };
                    table.apply_update(id, &update).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    let mut checked = 0usize;
                    while !done.load(Ordering::SeqCst) || checked == 0 {
                        for row in table.snapshot() {
                            assert_eq!(row.temperature, row.moisture);
                            assert_eq!(Some(row.temperature), row.timestamp);
                        }
                        checked += 1;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(table.len(), 8);
    }
}
