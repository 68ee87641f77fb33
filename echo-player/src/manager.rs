//! Guild → player registry

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::playback::{Player, PlayerContext};

/// Lazily creates one [`Player`] per guild, all sharing one context
pub struct PlayerManager {
    ctx: PlayerContext,
    players: Mutex<HashMap<String, Arc<Player>>>,
}

impl PlayerManager {
    pub fn new(ctx: PlayerContext) -> Self {
        Self {
            ctx,
            players: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &PlayerContext {
        &self.ctx
    }

    /// Player for `guild_id`, created on first use
    pub async fn get(&self, guild_id: &str) -> Arc<Player> {
        let mut players = self.players.lock().await;
        Arc::clone(
            players
                .entry(guild_id.to_string())
                .or_insert_with(|| Player::new(guild_id, self.ctx.clone())),
        )
    }

    /// Disconnect and forget the player for `guild_id`
    pub async fn remove(&self, guild_id: &str) -> bool {
        let removed = self.players.lock().await.remove(guild_id);
        match removed {
            Some(player) => {
                player.disconnect().await;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.players.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Disconnect every player
    pub async fn shutdown(&self) {
        let players: Vec<Arc<Player>> = self.players.lock().await.drain().map(|(_, p)| p).collect();
        info!("Shutting down {} players", players.len());
        for player in players {
            player.disconnect().await;
        }
    }
}
