use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
};

use tokio::sync::RwLock;

use m2m_bus::session::Session;

static SESSION_MANAGER: LazyLock<RwLock<HashMap<String, Arc<Session>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

pub(crate) async fn add_session(
    id: &str,
    session: Arc<Session>,
    replace_if_exists: bool,
) -> anyhow::Result<()> {
    let mut sessions = SESSION_MANAGER.write().await;
    if sessions.contains_key(id) {
        if !replace_if_exists {
            return Err(anyhow::anyhow!("session already exists"));
        } else if let Some(old) = sessions.remove(id) {
            old.close();
        }
    }
    sessions.insert(id.to_string(), session);
    Ok(())
}

pub(crate) async fn remove_session(id: &str) {
    let mut sessions = SESSION_MANAGER.write().await;
    if let Some(session) = sessions.remove(id) {
        session.close();
    }
}

pub(crate) async fn get_session(id: &str) -> Option<Arc<Session>> {
    SESSION_MANAGER.read().await.get(id).cloned()
}
