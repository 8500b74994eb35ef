// Cross-series driver contribution terms
//
// Driver reads never mutate the referenced series; callers hold the store
// lock so the contributions observe a consistent snapshot for the tick.

use crate::config::DriverRef;
use crate::core::history::HistoryStore;
use crate::types::Channel;

/// Accumulated (AR, MA) contribution of all configured drivers.
///
/// Yields `(0.0, 0.0)` while the generator set is warming up or when no
/// drivers are configured. A driver whose series has no history entry is
/// skipped and contributes zero.
pub fn compute_driver_parts(
    store: &HistoryStore,
    drivers: &[DriverRef],
    drivers_active: bool,
) -> (f64, f64) {
    let mut ar_part = 0.0;
    let mut ma_part = 0.0;

    if !drivers_active || drivers.is_empty() {
        return (ar_part, ma_part);
    }

    for driver in drivers {
        if !store.contains(&driver.id) {
            continue;
        }

        if let Some(p) = &driver.p {
            let available = store.len(&driver.id, Channel::X);
            for (j, coeff) in p.iter().enumerate().take(available) {
                if let Some(x) = store.get(&driver.id, Channel::X, j) {
                    ar_part += coeff * x;
                }
            }
        }

        if let Some(q) = &driver.q {
            let available = store.len(&driver.id, Channel::E);
            for (j, coeff) in q.iter().enumerate().take(available) {
                if let Some(e) = store.get(&driver.id, Channel::E, j) {
                    ma_part += coeff * e;
                }
            }
        }
    }

    (ar_part, ma_part)
}
