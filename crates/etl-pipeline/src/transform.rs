//! Row to document transformation.
//!
//! Pure functions: no I/O, no clock. Nested relation lists are sorted by id
//! and de-duplicated, so two rows holding the same data in a different
//! aggregation order produce byte-identical documents.

use chrono::{DateTime, Utc};
use serde::Serialize;

use etl_types::{
    ChangeRow, EntityKind, FilmRef, GenreRef, GenreRow, IndexDocument, MovieRow, PersonFilmRef,
    PersonRef, PersonRow,
};

use crate::error::TransformError;

/// Access rule attached to a movie. No rules are produced yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessRule {
    pub privilege: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieDocument {
    pub id: String,
    pub imdb_rating: Option<f64>,
    pub genres: Vec<GenreRef>,
    pub title: String,
    pub description: Option<String>,
    pub directors_names: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub directors: Vec<PersonRef>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
    pub access: Vec<AccessRule>,
    pub last_change_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenreDocument {
    pub id: String,
    pub name: String,
    pub description: String,
    pub films: Vec<FilmRef>,
    pub last_change_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonDocument {
    pub id: String,
    pub full_name: String,
    pub films: Vec<PersonFilmRef>,
    pub last_change_date: DateTime<Utc>,
}

/// Map one extractor row to its index document.
pub fn transform(row: &ChangeRow) -> Result<IndexDocument, TransformError> {
    let (id, body) = match row {
        ChangeRow::Movie(movie) => {
            let doc = movie_document(movie)?;
            (doc.id.clone(), serde_json::to_value(&doc)?)
        }
        ChangeRow::Genre(genre) => {
            let doc = genre_document(genre)?;
            (doc.id.clone(), serde_json::to_value(&doc)?)
        }
        ChangeRow::Person(person) => {
            let doc = person_document(person)?;
            (doc.id.clone(), serde_json::to_value(&doc)?)
        }
    };
    Ok(IndexDocument::new(id, body, row.last_change_date()))
}

/// Transform a whole batch, failing on the first malformed row.
pub fn transform_batch(rows: &[ChangeRow]) -> Result<Vec<IndexDocument>, TransformError> {
    rows.iter().map(transform).collect()
}

pub fn movie_document(row: &MovieRow) -> Result<MovieDocument, TransformError> {
    let id = required_id(EntityKind::Movie, &row.id)?;
    let title = required_text(EntityKind::Movie, &row.id, "title", row.title.as_deref())?;
    required_labels(
        EntityKind::Movie,
        &row.id,
        "genre",
        row.genres.iter().map(|g| (g.uuid.as_str(), g.name.as_str())),
    )?;
    for (relation, people) in [
        ("director", &row.directors),
        ("actor", &row.actors),
        ("writer", &row.writers),
    ] {
        required_labels(
            EntityKind::Movie,
            &row.id,
            relation,
            people.iter().map(|p| (p.id.as_str(), p.name.as_str())),
        )?;
    }

    Ok(MovieDocument {
        id,
        imdb_rating: row.imdb_rating,
        genres: normalize(&row.genres, |g| (g.uuid.as_str(), g.name.as_str())),
        title,
        description: row.description.clone(),
        directors_names: normalize_names(&row.directors_names),
        actors_names: normalize_names(&row.actors_names),
        writers_names: normalize_names(&row.writers_names),
        directors: normalize_people(&row.directors),
        actors: normalize_people(&row.actors),
        writers: normalize_people(&row.writers),
        access: Vec::new(),
        last_change_date: row.last_change_date,
    })
}

pub fn genre_document(row: &GenreRow) -> Result<GenreDocument, TransformError> {
    let id = required_id(EntityKind::Genre, &row.id)?;
    let name = required_text(EntityKind::Genre, &row.id, "name", row.name.as_deref())?;
    required_labels(
        EntityKind::Genre,
        &row.id,
        "film",
        row.films.iter().map(|f| (f.id.as_str(), f.title.as_str())),
    )?;

    Ok(GenreDocument {
        id,
        name,
        description: row.description.clone().unwrap_or_default(),
        films: normalize(&row.films, |f| (f.id.as_str(), f.title.as_str())),
        last_change_date: row.last_change_date,
    })
}

pub fn person_document(row: &PersonRow) -> Result<PersonDocument, TransformError> {
    let id = required_id(EntityKind::Person, &row.id)?;
    let full_name =
        required_text(EntityKind::Person, &row.id, "full_name", row.full_name.as_deref())?;
    required_labels(
        EntityKind::Person,
        &row.id,
        "film",
        row.films.iter().map(|f| (f.id.as_str(), f.title.as_str())),
    )?;

    let mut films = normalize(&row.films, |f| (f.id.as_str(), f.title.as_str()));
    for film in &mut films {
        film.roles = normalize_names(&film.roles);
    }

    Ok(PersonDocument {
        id,
        full_name,
        films,
        last_change_date: row.last_change_date,
    })
}

fn required_id(entity: EntityKind, id: &str) -> Result<String, TransformError> {
    if id.trim().is_empty() {
        return Err(TransformError::MalformedRow {
            entity,
            id: id.to_string(),
            reason: "empty id".to_string(),
        });
    }
    Ok(id.to_string())
}

fn required_text(
    entity: EntityKind,
    id: &str,
    field: &str,
    value: Option<&str>,
) -> Result<String, TransformError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(TransformError::MalformedRow {
            entity,
            id: id.to_string(),
            reason: format!("missing {}", field),
        }),
    }
}

/// Every related entity carries a non-blank label.
fn required_labels<'a>(
    entity: EntityKind,
    id: &str,
    relation: &str,
    labels: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<(), TransformError> {
    match labels.into_iter().find(|(_, label)| label.trim().is_empty()) {
        Some((related, _)) => Err(TransformError::MalformedRow {
            entity,
            id: id.to_string(),
            reason: format!("{} {} has no name", relation, related),
        }),
        None => Ok(()),
    }
}

/// Sort by `(id, label)` and keep the first entry per id.
fn normalize<T, F>(items: &[T], key: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> (&str, &str),
{
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| key(a).cmp(&key(b)));
    sorted.dedup_by(|a, b| key(a).0 == key(b).0);
    sorted
}

fn normalize_people(people: &[PersonRef]) -> Vec<PersonRef> {
    normalize(people, |p| (p.id.as_str(), p.name.as_str()))
}

fn normalize_names(names: &[String]) -> Vec<String> {
    let mut sorted = names.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}
