use lazy_static::lazy_static;
use std::collections::HashMap;

/// Language used when a key is missing from the requested table.
pub const DEFAULT_LANGUAGE: &str = "fr";

/// Shown for an empty translation key.
pub const UNTRANSLATED_PLACEHOLDER: &str = "?";

type Table = HashMap<String, String>;

lazy_static! {
    static ref BUNDLED: HashMap<&'static str, Vec<(&'static str, &'static str)>> = {
        let mut tables = HashMap::new();
        tables.insert(
            "fr",
            vec![
                ("dashboard", "Tableau de Bord"),
                ("plants", "Installations"),
                ("reports", "Rapports"),
                ("settings", "Paramètres"),
                ("login", "Connexion"),
                ("logout", "Déconnexion"),
                ("map", "Carte"),
                ("statistics", "Statistiques"),
                ("dashboard_title", "Tableau de Bord de Recyclage de Lithium"),
                ("subtitle", "Plateforme de Collaboration Interuniversitaire"),
                ("map_title", "Carte des Installations"),
                ("plants_list", "Installations de Recyclage"),
                ("recycling_rate", "Taux de Recyclage par Installation"),
                ("production_trends", "Tendances de Production"),
                ("status", "Statut"),
                ("operational", "Opérationnel"),
                ("maintenance", "En maintenance"),
                ("offline", "Hors ligne"),
                ("planning", "En planification"),
                ("capacity", "Capacité"),
                ("not_available", "Non disponible"),
                ("name", "Nom"),
                ("location", "Emplacement"),
                ("country", "Pays"),
                ("production", "Production"),
                ("general_reports", "Rapports généraux"),
                ("unknown_group", "Installation inconnue"),
                ("upload_document", "Ajouter un document"),
                ("login_required", "Veuillez vous connecter pour continuer"),
                ("missing_credentials", "Veuillez entrer un nom d'utilisateur et un mot de passe"),
                ("dark_mode", "Mode sombre"),
                ("language", "Langue"),
            ],
        );
        tables.insert(
            "en",
            vec![
                ("dashboard", "Dashboard"),
                ("plants", "Facilities"),
                ("reports", "Reports"),
                ("settings", "Settings"),
                ("login", "Login"),
                ("logout", "Logout"),
                ("map", "Map"),
                ("statistics", "Statistics"),
                ("dashboard_title", "Lithium Recycling Dashboard"),
                ("subtitle", "Inter-University Collaboration Platform"),
                ("map_title", "Facilities Map"),
                ("plants_list", "Recycling Facilities"),
                ("recycling_rate", "Recycling Rate by Facility"),
                ("production_trends", "Production Trends"),
                ("status", "Status"),
                ("operational", "Operational"),
                ("maintenance", "Under maintenance"),
                ("offline", "Offline"),
                ("planning", "Planning"),
                ("capacity", "Capacity"),
                ("not_available", "Not available"),
                ("name", "Name"),
                ("location", "Location"),
                ("country", "Country"),
                ("production", "Production"),
                ("general_reports", "General reports"),
                ("unknown_group", "Unknown facility"),
                ("upload_document", "Upload a document"),
                ("login_required", "Please log in to continue"),
                ("dark_mode", "Dark mode"),
            ],
        );
        tables
    };
}

/// Maps a (language, key) pair to display text.
///
/// Lookup order is the requested language, then the default language, then
/// the key itself. An empty translation counts as missing.
#[derive(Clone, Debug)]
pub struct LocalizationResolver {
    tables: HashMap<String, Table>,
    default_language: String,
}

impl LocalizationResolver {
    pub fn new(default_language: impl Into<String>) -> Self {
        LocalizationResolver {
            tables: HashMap::new(),
            default_language: default_language.into(),
        }
    }

    /// Resolver loaded with the tables shipped in the binary.
    pub fn bundled() -> Self {
        Self::bundled_with_default(DEFAULT_LANGUAGE)
    }

    pub fn bundled_with_default(default_language: &str) -> Self {
        let mut resolver = Self::new(default_language);
        for (language, entries) in BUNDLED.iter() {
            resolver.insert_table(
                language,
                entries.iter().map(|(k, v)| (k.to_string(), v.to_string())),
            );
        }
        resolver
    }

    /// Add or extend the table for `language`.
    pub fn insert_table(
        &mut self,
        language: &str,
        entries: impl IntoIterator<Item = (String, String)>,
    ) {
        self.tables
            .entry(language.to_string())
            .or_default()
            .extend(entries);
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        languages.sort_unstable();
        languages
    }

    /// Display text for `key`.
    ///
    /// Looks in `language`, then in the default language, then falls back to
    /// the key itself. The result is never empty: an empty key with no
    /// translation resolves to [`UNTRANSLATED_PLACEHOLDER`].
    ///
    /// # Arguments
    ///
    /// * `language` - Requested language code. Unknown codes are not an error.
    /// * `key` - Translation key.
    pub fn resolve<'a>(&'a self, language: &str, key: &'a str) -> &'a str {
        if let Some(text) = self.lookup(language, key) {
            return text;
        }

        log::debug!("missing translation: {} for language {}", key, language);

        self.lookup(&self.default_language, key)
            .unwrap_or(if key.is_empty() { UNTRANSLATED_PLACEHOLDER } else { key })
    }

    fn lookup(&self, language: &str, key: &str) -> Option<&str> {
        self.tables
            .get(language)
            .and_then(|table| table.get(key))
            .map(String::as_str)
            .filter(|text| !text.is_empty())
    }
}

impl Default for LocalizationResolver {
    fn default() -> Self {
        Self::bundled()
    }
}
