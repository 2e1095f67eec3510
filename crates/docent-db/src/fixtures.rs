use crate::{DbError, DbPool};

struct MuseumSeed {
    museum_id: i64,
    name: &'static str,
    location: &'static str,
    city: &'static str,
    state: &'static str,
    description: &'static str,
    contact_email: &'static str,
    contact_number: &'static str,
    opening_time: &'static str,
    closing_time: &'static str,
}

/// Demonstration catalogue
const MUSEUMS: &[MuseumSeed] = &[
    MuseumSeed {
        museum_id: 1,
        name: "City Art Museum",
        location: "12 Gallery Row",
        city: "Springfield",
        state: "IL",
        description: "Paintings and sculpture from the Renaissance to the present day.",
        contact_email: "info@cityartmuseum.example",
        contact_number: "+1-217-555-0101",
        opening_time: "09:00",
        closing_time: "17:00",
    },
    MuseumSeed {
        museum_id: 2,
        name: "Natural History Museum",
        location: "400 Fossil Avenue",
        city: "Springfield",
        state: "IL",
        description: "Dinosaur skeletons, minerals and a hall of regional wildlife.",
        contact_email: "visit@nhm.example",
        contact_number: "+1-217-555-0142",
        opening_time: "10:00",
        closing_time: "18:00",
    },
    MuseumSeed {
        museum_id: 3,
        name: "Harbor Maritime Museum",
        location: "1 Pier Street",
        city: "Portland",
        state: "ME",
        description: "Ship models, navigation instruments and a restored lightship.",
        contact_email: "hello@harbormaritime.example",
        contact_number: "+1-207-555-0177",
        opening_time: "09:30",
        closing_time: "16:30",
    },
    MuseumSeed {
        museum_id: 4,
        name: "Museum of Science and Industry",
        location: "77 Engine Way",
        city: "Chicago",
        state: "IL",
        description: "Hands-on exhibits on energy, flight and manufacturing.",
        contact_email: "tickets@msi.example",
        contact_number: "+1-312-555-0190",
        opening_time: "09:30",
        closing_time: "17:30",
    },
    MuseumSeed {
        museum_id: 5,
        name: "Modern Photography Gallery",
        location: "221 Lens Boulevard",
        city: "Austin",
        state: "TX",
        description: "Rotating exhibitions of twentieth and twenty-first century photography.",
        contact_email: "desk@mpg.example",
        contact_number: "+1-512-555-0123",
        opening_time: "11:00",
        closing_time: "19:00",
    },
];

/// Insert the demonstration museums. Existing rows are left alone, so this can
/// run on every start. Returns the number of museums added.
pub async fn seed_museums(pool: &DbPool) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for museum in MUSEUMS {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO museums (
                museum_id, name, location, city, state, description,
                contact_email, contact_number, opening_time, closing_time
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(museum.museum_id)
        .bind(museum.name)
        .bind(museum.location)
        .bind(museum.city)
        .bind(museum.state)
        .bind(museum.description)
        .bind(museum.contact_email)
        .bind(museum.contact_number)
        .bind(museum.opening_time)
        .bind(museum.closing_time)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;
    if inserted > 0 {
        tracing::debug!(inserted, "Seeded museum catalogue");
    }
    Ok(inserted)
}

/// Number of museums in the demonstration catalogue
pub fn seed_count() -> usize {
    MUSEUMS.len()
}
