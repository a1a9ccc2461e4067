use sled::{
    transaction::{abort, TransactionError},
    Db, Transactional, Tree,
};
use thiserror::Error;

use crate::models::{Booking, BookingView, Place, User};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The document was rejected before being written.
    #[error("{0}")]
    Validation(String),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt document: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(e: TransactionError<StoreError>) -> Self {
        match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}

/// Embedded document store backing users, places and bookings.
///
/// Each collection is a Sled tree of serde_json documents keyed by id, with
/// secondary index trees for the lookups the API needs:
/// - `users_by_email`: normalised email -> user id (enforces uniqueness)
/// - `places_by_owner`: `{owner}/{place}` -> place id
/// - `bookings_by_user`: `{user}/{booking}` -> booking id
#[derive(Clone)]
pub struct Storage {
    db: Db,
    users: Tree,
    users_by_email: Tree,
    places: Tree,
    places_by_owner: Tree,
    bookings: Tree,
    bookings_by_user: Tree,
}

impl Storage {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            users: db.open_tree("users")?,
            users_by_email: db.open_tree("users_by_email")?,
            places: db.open_tree("places")?,
            places_by_owner: db.open_tree("places_by_owner")?,
            bookings: db.open_tree("bookings")?,
            bookings_by_user: db.open_tree("bookings_by_user")?,
            db,
        })
    }

    /// Flush dirty pages to disk; called on shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // --- Identity store ---

    /// Insert a new user. Fails with `Validation` if the email is empty or
    /// already registered (case-insensitive).
    pub fn create_user(&self, user: User) -> Result<User, StoreError> {
        let key = email_key(&user.email);
        if key.is_empty() {
            return Err(StoreError::Validation("email is required".to_string()));
        }
        let bytes = serde_json::to_vec(&user)?;

        (&self.users, &self.users_by_email)
            .transaction(|(users, by_email)| {
                if by_email.get(key.as_bytes())?.is_some() {
                    return abort(StoreError::Validation(format!(
                        "email {} is already registered",
                        user.email
                    )));
                }
                by_email.insert(key.as_bytes(), user.id.as_bytes())?;
                users.insert(user.id.as_bytes(), bytes.as_slice())?;
                Ok(())
            })
            .map_err(StoreError::from)?;

        Ok(user)
    }

    pub fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        get_doc(&self.users, id)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        match self.users_by_email.get(email_key(email).as_bytes())? {
            Some(id) => get_doc(&self.users, &String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    // --- Listing store ---

    pub fn create_place(&self, place: Place) -> Result<Place, StoreError> {
        place.validate().map_err(StoreError::Validation)?;
        let bytes = serde_json::to_vec(&place)?;
        let index_key = format!("{}/{}", place.owner, place.id);

        (&self.places, &self.places_by_owner)
            .transaction(|(places, by_owner)| {
                places.insert(place.id.as_bytes(), bytes.as_slice())?;
                by_owner.insert(index_key.as_bytes(), place.id.as_bytes())?;
                Ok::<_, sled::transaction::ConflictableTransactionError<StoreError>>(())
            })
            .map_err(StoreError::from)?;

        Ok(place)
    }

    pub fn find_place(&self, id: &str) -> Result<Option<Place>, StoreError> {
        get_doc(&self.places, id)
    }

    pub fn all_places(&self) -> Result<Vec<Place>, StoreError> {
        self.places
            .iter()
            .values()
            .map(|v| -> Result<Place, StoreError> { Ok(serde_json::from_slice(&v?)?) })
            .collect()
    }

    pub fn places_by_owner(&self, owner: &str) -> Result<Vec<Place>, StoreError> {
        let ids = scan_index(&self.places_by_owner, owner)?;
        let mut places = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(place) = self.find_place(&id)? {
                places.push(place);
            }
        }
        Ok(places)
    }

    /// Persist a mutated place under its existing id. The owner index is not
    /// touched since ownership never changes.
    pub fn save_place(&self, place: &Place) -> Result<(), StoreError> {
        place.validate().map_err(StoreError::Validation)?;
        self.places
            .insert(place.id.as_bytes(), serde_json::to_vec(place)?)?;
        Ok(())
    }

    // --- Reservation store ---

    pub fn create_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        booking.validate().map_err(StoreError::Validation)?;
        let bytes = serde_json::to_vec(&booking)?;
        let index_key = format!("{}/{}", booking.user, booking.id);

        (&self.bookings, &self.bookings_by_user)
            .transaction(|(bookings, by_user)| {
                bookings.insert(booking.id.as_bytes(), bytes.as_slice())?;
                by_user.insert(index_key.as_bytes(), booking.id.as_bytes())?;
                Ok::<_, sled::transaction::ConflictableTransactionError<StoreError>>(())
            })
            .map_err(StoreError::from)?;

        Ok(booking)
    }

    pub fn bookings_by_user(&self, user: &str) -> Result<Vec<Booking>, StoreError> {
        let ids = scan_index(&self.bookings_by_user, user)?;
        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(booking) = get_doc::<Booking>(&self.bookings, &id)? {
                bookings.push(booking);
            }
        }
        Ok(bookings)
    }

    /// Bookings authored by `user`, each with its place expanded to the
    /// current listing.
    pub fn bookings_with_places(&self, user: &str) -> Result<Vec<BookingView>, StoreError> {
        self.bookings_by_user(user)?
            .into_iter()
            .map(|booking| -> Result<BookingView, StoreError> {
                let place = self.find_place(&booking.place)?;
                Ok(booking.expand(place))
            })
            .collect()
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

fn get_doc<T: serde::de::DeserializeOwned>(tree: &Tree, id: &str) -> Result<Option<T>, StoreError> {
    match tree.get(id.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn scan_index(tree: &Tree, prefix: &str) -> Result<Vec<String>, StoreError> {
    tree.scan_prefix(format!("{prefix}/").as_bytes())
        .values()
        .map(|v| -> Result<String, StoreError> { Ok(String::from_utf8_lossy(&v?).into_owned()) })
        .collect()
}
