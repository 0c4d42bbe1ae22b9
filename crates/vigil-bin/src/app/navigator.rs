use auth_resilience::{Navigator, Notice};
use tracing::info;

/// Prints navigations and notices instead of driving a UI.
pub struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, route: &str) {
        info!(route = %route, "Navigating");
        println!("-> navigate {route}");
    }

    fn notify(&self, notice: &Notice) {
        println!("[{}] {}", notice.title, notice.description);
    }
}
