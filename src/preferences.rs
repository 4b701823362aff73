use crate::error::DashboardResult;
use crate::i18n::LocalizationResolver;
use crate::persistence::{KeyValueStore, PersistenceBridge};

pub const DARK_MODE_KEY: &str = "darkMode";
pub const LANGUAGE_KEY: &str = "language";
pub const REMEMBERED_USERNAME_KEY: &str = "rememberedUsername";

/// Per-browser display preferences and the remembered login name.
pub struct Preferences<K> {
    bridge: PersistenceBridge<K>,
}

impl<K: KeyValueStore> Preferences<K> {
    pub fn new(bridge: PersistenceBridge<K>) -> Self {
        Preferences { bridge }
    }

    /// Unreadable values count as unset.
    pub fn dark_mode(&self) -> bool {
        self.bridge
            .load::<bool>(DARK_MODE_KEY)
            .unwrap_or_else(|e| {
                log::warn!("dark mode preference unreadable: {}", e);
                None
            })
            .unwrap_or(false)
    }

    pub fn set_dark_mode(&self, enabled: bool) -> DashboardResult<()> {
        self.bridge.store(DARK_MODE_KEY, &enabled)
    }

    /// Selected language, falling back to the resolver's default when none
    /// is stored or the stored one has no table.
    pub fn language(&self, resolver: &LocalizationResolver) -> String {
        let stored = self.bridge.load::<String>(LANGUAGE_KEY).unwrap_or_else(|e| {
            log::warn!("language preference unreadable: {}", e);
            None
        });
        match stored {
            Some(lang) if resolver.languages().contains(&lang.as_str()) => lang,
            _ => resolver.default_language().to_string(),
        }
    }

    /// Store the display language. It is not checked against the resolver;
    /// [`Preferences::language`] falls back when it has no table.
    pub fn set_language(&self, language: &str) -> DashboardResult<()> {
        self.bridge.store(LANGUAGE_KEY, language)
    }

    /// Username to prefill the login form with. Unreadable or empty values
    /// count as unset.
    pub fn remembered_username(&self) -> Option<String> {
        self.bridge
            .load::<String>(REMEMBERED_USERNAME_KEY)
            .ok()
            .flatten()
            .filter(|name| !name.is_empty())
    }

    /// Remember `username` for the next login form, or forget it with `None`.
    pub fn remember_username(&self, username: Option<&str>) -> DashboardResult<()> {
        match username {
            Some(name) if !name.trim().is_empty() => {
                self.bridge.store(REMEMBERED_USERNAME_KEY, name.trim())
            }
            _ => self.bridge.remove(REMEMBERED_USERNAME_KEY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[test]
    fn preferences_persist_across_instances() {
        let kv = MemoryStore::new();
        let resolver = LocalizationResolver::bundled();

        let prefs = Preferences::new(PersistenceBridge::new(kv.clone()));
        assert!(!prefs.dark_mode());
        assert_eq!(prefs.language(&resolver), "fr");
        prefs.set_dark_mode(true).unwrap();
        prefs.set_language("en").unwrap();
        prefs.remember_username(Some("admin")).unwrap();

        let reopened = Preferences::new(PersistenceBridge::new(kv));
        assert!(reopened.dark_mode());
        assert_eq!(reopened.language(&resolver), "en");
        assert_eq!(reopened.remembered_username().as_deref(), Some("admin"));

        reopened.remember_username(None).unwrap();
        assert_eq!(reopened.remembered_username(), None);
    }

    #[test]
    fn unknown_language_falls_back_to_default() {
        let prefs = Preferences::new(PersistenceBridge::new(MemoryStore::new()));
        prefs.set_language("de").unwrap();
        assert_eq!(prefs.language(&LocalizationResolver::bundled()), "fr");
    }
}
