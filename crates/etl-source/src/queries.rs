//! Extraction SQL, one statement per entity type.
//!
//! Each statement takes a single bind parameter (`$1`, the watermark) and
//! returns one row per entity with its relations aggregated into JSON or
//! text arrays. `last_change_date` is the maximum over the entity's own
//! `modified`, the `created` of every link row, and the `modified` of every
//! linked entity. Link rows carry no `modified` column, so deleting a link
//! does not move `last_change_date`.
//!
//! Ids are cast to text and ratings to float8 so decoding does not depend on
//! the exact column types of the schema.

use etl_types::EntityKind;

pub const MOVIE_QUERY: &str = r#"
SELECT
    fw.id::text AS id,
    fw.title,
    fw.description,
    fw.rating::float8 AS imdb_rating,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('uuid', g.id::text, 'name', g.name))
            FILTER (WHERE g.id IS NOT NULL),
        '[]'
    ) AS genres,
    COALESCE(array_agg(DISTINCT p.full_name::text) FILTER (WHERE pfw.role = 'director'), '{}')::text[] AS directors_names,
    COALESCE(array_agg(DISTINCT p.full_name::text) FILTER (WHERE pfw.role = 'actor'), '{}')::text[] AS actors_names,
    COALESCE(array_agg(DISTINCT p.full_name::text) FILTER (WHERE pfw.role = 'writer'), '{}')::text[] AS writers_names,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id::text, 'name', p.full_name))
            FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'director'),
        '[]'
    ) AS directors,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id::text, 'name', p.full_name))
            FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'actor'),
        '[]'
    ) AS actors,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id::text, 'name', p.full_name))
            FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'writer'),
        '[]'
    ) AS writers,
    MAX(v.last_change_date)::timestamptz AS last_change_date
FROM content.film_work fw
LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
LEFT JOIN content.person p ON p.id = pfw.person_id
LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
LEFT JOIN content.genre g ON g.id = gfw.genre_id
CROSS JOIN LATERAL (
    VALUES (fw.modified), (pfw.created), (p.modified), (gfw.created), (g.modified)
) v(last_change_date)
GROUP BY fw.id
HAVING MAX(v.last_change_date) > $1
ORDER BY fw.title, fw.id
"#;

pub const GENRE_QUERY: &str = r#"
SELECT
    g.id::text AS id,
    g.name,
    g.description,
    COALESCE(
        json_agg(
            DISTINCT jsonb_build_object(
                'id', fw.id::text,
                'title', fw.title,
                'imdb_rating', fw.rating::float8
            )
        ) FILTER (WHERE fw.id IS NOT NULL),
        '[]'
    ) AS films,
    MAX(v.last_change_date)::timestamptz AS last_change_date
FROM content.genre g
LEFT JOIN content.genre_film_work gfw ON g.id = gfw.genre_id
LEFT JOIN content.film_work fw ON fw.id = gfw.film_work_id
CROSS JOIN LATERAL (
    VALUES (g.modified), (gfw.created), (fw.modified)
) v(last_change_date)
GROUP BY g.id
HAVING MAX(v.last_change_date) > $1
ORDER BY g.name, g.id
"#;

pub const PERSON_QUERY: &str = r#"
WITH film_roles AS (
    SELECT
        pfw.person_id,
        fw.id AS film_id,
        fw.title,
        fw.rating,
        ARRAY_AGG(DISTINCT pfw.role::text) AS roles,
        MAX(GREATEST(fw.modified, pfw.created)) AS film_modified
    FROM content.person_film_work pfw
    JOIN content.film_work fw ON fw.id = pfw.film_work_id
    GROUP BY pfw.person_id, fw.id, fw.title, fw.rating
)
SELECT
    p.id::text AS id,
    p.full_name,
    COALESCE(
        jsonb_agg(
            DISTINCT jsonb_build_object(
                'id', fr.film_id::text,
                'title', fr.title,
                'imdb_rating', fr.rating::float8,
                'roles', fr.roles
            )
        ) FILTER (WHERE fr.film_id IS NOT NULL),
        '[]'
    ) AS films,
    MAX(v.last_change_date)::timestamptz AS last_change_date
FROM content.person p
LEFT JOIN film_roles fr ON p.id = fr.person_id
CROSS JOIN LATERAL (
    VALUES (p.modified), (fr.film_modified)
) v(last_change_date)
GROUP BY p.id
HAVING MAX(v.last_change_date) > $1
ORDER BY p.full_name, p.id
"#;

/// Extraction statement for an entity type.
pub fn extraction_query(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Movie => MOVIE_QUERY,
        EntityKind::Genre => GENRE_QUERY,
        EntityKind::Person => PERSON_QUERY,
    }
}
