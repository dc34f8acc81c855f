/*!
Helpers pour tests asynchrones

- Logging tracing redirigé vers la sortie de test
- Attente d'une condition avec timeout (ingestion en tâche de fond)
*/

use std::time::{Duration, Instant};

/// Init logging pour tests (idempotent)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Attend que `condition` devienne vraie, en la réévaluant toutes les 10ms.
/// Retourne false si le timeout expire avant.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tracing::warn!("⏰ condition not met after {:?}", timeout);
    condition()
}
