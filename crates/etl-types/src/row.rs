//! Raw rows produced by the change extractor.
//!
//! Each row is one entity with its many-to-many relations already
//! aggregated by the source query, plus `last_change_date`: the newest
//! modification timestamp across the entity and every joined relation.
//! Scalar columns that the source allows to be NULL stay optional here;
//! deciding whether a row is usable is left to the transformer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::job::EntityKind;

/// Labels inside aggregated JSON may be NULL; they decode as empty and the
/// transformer rejects the row.
fn nullable_label<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Genre as aggregated into a movie row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreRef {
    pub uuid: String,
    #[serde(default, deserialize_with = "nullable_label")]
    pub name: String,
}

/// Person credited on a movie (director, actor or writer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: String,
    #[serde(default, deserialize_with = "nullable_label")]
    pub name: String,
}

/// Film as aggregated into a genre row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmRef {
    pub id: String,
    #[serde(default, deserialize_with = "nullable_label")]
    pub title: String,
    #[serde(default)]
    pub imdb_rating: Option<f64>,
}

/// Film as aggregated into a person row, with the person's roles on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonFilmRef {
    pub id: String,
    #[serde(default, deserialize_with = "nullable_label")]
    pub title: String,
    #[serde(default)]
    pub imdb_rating: Option<f64>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieRow {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub imdb_rating: Option<f64>,
    pub genres: Vec<GenreRef>,
    pub directors_names: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub directors: Vec<PersonRef>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
    pub last_change_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenreRow {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub films: Vec<FilmRef>,
    pub last_change_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonRow {
    pub id: String,
    pub full_name: Option<String>,
    pub films: Vec<PersonFilmRef>,
    pub last_change_date: DateTime<Utc>,
}

/// One unit of extractor output.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRow {
    Movie(MovieRow),
    Genre(GenreRow),
    Person(PersonRow),
}

impl ChangeRow {
    pub fn entity(&self) -> EntityKind {
        match self {
            ChangeRow::Movie(_) => EntityKind::Movie,
            ChangeRow::Genre(_) => EntityKind::Genre,
            ChangeRow::Person(_) => EntityKind::Person,
        }
    }

    /// Primary key of the source entity.
    pub fn id(&self) -> &str {
        match self {
            ChangeRow::Movie(row) => &row.id,
            ChangeRow::Genre(row) => &row.id,
            ChangeRow::Person(row) => &row.id,
        }
    }

    pub fn last_change_date(&self) -> DateTime<Utc> {
        match self {
            ChangeRow::Movie(row) => row.last_change_date,
            ChangeRow::Genre(row) => row.last_change_date,
            ChangeRow::Person(row) => row.last_change_date,
        }
    }

    /// Ordering key used by the extractor: display name, then id.
    pub fn sort_key(&self) -> (&str, &str) {
        let name = match self {
            ChangeRow::Movie(row) => row.title.as_deref(),
            ChangeRow::Genre(row) => row.name.as_deref(),
            ChangeRow::Person(row) => row.full_name.as_deref(),
        };
        (name.unwrap_or_default(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_change_row_accessors() {
        let row = ChangeRow::Person(PersonRow {
            id: "p-1".to_string(),
            full_name: Some("Ann Smith".to_string()),
            films: vec![],
            last_change_date: ts(3),
        });

        assert_eq!(row.entity(), EntityKind::Person);
        assert_eq!(row.id(), "p-1");
        assert_eq!(row.last_change_date(), ts(3));
        assert_eq!(row.sort_key(), ("Ann Smith", "p-1"));
    }

    #[test]
    fn test_sort_key_without_name() {
        let row = ChangeRow::Genre(GenreRow {
            id: "g-1".to_string(),
            name: None,
            description: None,
            films: vec![],
            last_change_date: ts(1),
        });
        assert_eq!(row.sort_key(), ("", "g-1"));
    }

    #[test]
    fn test_nested_refs_from_aggregated_json() {
        let json = r#"[{"id":"f-1","title":"Alien","imdb_rating":null,"roles":["actor","writer"]}]"#;
        let films: Vec<PersonFilmRef> = serde_json::from_str(json).unwrap();
        assert_eq!(films.len(), 1);
        assert_eq!(films[0].imdb_rating, None);
        assert_eq!(films[0].roles, vec!["actor", "writer"]);

        let json = r#"[{"id":"f-2","title":"Heat"}]"#;
        let films: Vec<FilmRef> = serde_json::from_str(json).unwrap();
        assert_eq!(films[0].imdb_rating, None);
    }

    #[test]
    fn test_null_nested_labels_decode_as_empty() {
        let genres: Vec<GenreRef> =
            serde_json::from_str(r#"[{"uuid":"g-1","name":null}]"#).unwrap();
        assert_eq!(genres[0].name, "");

        let people: Vec<PersonRef> = serde_json::from_str(r#"[{"id":"p-1"}]"#).unwrap();
        assert_eq!(people[0].name, "");

        let films: Vec<PersonFilmRef> =
            serde_json::from_str(r#"[{"id":"f-1","title":null,"roles":["actor"]}]"#).unwrap();
        assert_eq!(films[0].title, "");
    }
}
