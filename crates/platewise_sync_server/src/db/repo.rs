use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A server-tracked authentication grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub subject_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A session is valid iff it has not expired and was never revoked.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && self.revoked_at.is_none()
    }
}

/// A freshly created session together with its credential.
///
/// The credential is only ever available here; the table stores its hash.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session: Session,
    pub token: String,
}

/// Session table access
#[derive(Clone)]
pub struct SessionRepo {
    conn: Arc<Mutex<Connection>>,
}

impl SessionRepo {
    /// Create a new SessionRepo with the given connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session for `subject_id` valid for `ttl`
    pub fn create_session(
        &self,
        subject_id: &str,
        ttl: chrono::Duration,
    ) -> Result<NewSession, rusqlite::Error> {
        let conn = self.conn();
        let token = generate_secure_token();
        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            created_at: timestamp_to_datetime(now.timestamp()),
            expires_at: timestamp_to_datetime((now + ttl).timestamp()),
            revoked_at: None,
        };

        conn.execute(
            "INSERT INTO sessions (id, token_hash, subject_id, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
            params![
                session.id,
                hash_token(&token),
                session.subject_id,
                session.created_at.timestamp(),
                session.expires_at.timestamp()
            ],
        )?;

        Ok(NewSession { session, token })
    }

    /// Look up the session a credential refers to, whatever its state
    pub fn find_by_token(&self, token: &str) -> Result<Option<Session>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, subject_id, created_at, expires_at, revoked_at
             FROM sessions WHERE token_hash = ?",
            [hash_token(token)],
            row_to_session,
        )
        .optional()
    }

    /// Get a session by id
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, subject_id, created_at, expires_at, revoked_at
             FROM sessions WHERE id = ?",
            [session_id],
            row_to_session,
        )
        .optional()
    }

    /// Mark a session revoked. Returns false if it was unknown or already revoked.
    pub fn revoke_session(&self, session_id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL",
            params![Utc::now().timestamp(), session_id],
        )?;
        Ok(updated > 0)
    }

    /// Revoke every live session of a subject, returning the revoked ids
    pub fn revoke_subject_sessions(&self, subject_id: &str) -> Result<Vec<String>, rusqlite::Error> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM sessions WHERE subject_id = ? AND revoked_at IS NULL")?;
            stmt.query_map([subject_id], |row| row.get(0))?
                .collect::<Result<_, _>>()?
        };
        tx.execute(
            "UPDATE sessions SET revoked_at = ? WHERE subject_id = ? AND revoked_at IS NULL",
            params![Utc::now().timestamp(), subject_id],
        )?;
        tx.commit()?;
        Ok(ids)
    }

    /// Delete expired sessions and sessions revoked more than `revoked_grace` ago
    pub fn cleanup_expired_sessions(
        &self,
        revoked_grace: chrono::Duration,
    ) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        let now = Utc::now();
        let deleted = conn.execute(
            "DELETE FROM sessions
             WHERE expires_at < ?
                OR (revoked_at IS NOT NULL AND revoked_at < ?)",
            params![now.timestamp(), (now - revoked_grace).timestamp()],
        )?;
        Ok(deleted)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        created_at: timestamp_to_datetime(row.get(2)?),
        expires_at: timestamp_to_datetime(row.get(3)?),
        revoked_at: row.get::<_, Option<i64>>(4)?.map(timestamp_to_datetime),
    })
}

/// Hash a credential for storage and lookup
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, digest)
}

/// Generate a secure random token
fn generate_secure_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;

    fn setup_test_db() -> SessionRepo {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        SessionRepo::new(conn)
    }

    #[test]
    fn test_create_and_find_session() {
        let repo = setup_test_db();
        let created = repo
            .create_session("user-1", chrono::Duration::days(1))
            .unwrap();
        assert!(!created.token.is_empty());

        let found = repo.find_by_token(&created.token).unwrap().unwrap();
        assert_eq!(found, created.session);
        assert!(found.is_valid_at(Utc::now()));

        assert!(repo.find_by_token("not-a-token").unwrap().is_none());
    }

    #[test]
    fn test_token_is_not_stored_in_clear() {
        let repo = setup_test_db();
        let created = repo
            .create_session("user-1", chrono::Duration::days(1))
            .unwrap();
        let conn = repo.conn();
        let stored: String = conn
            .query_row("SELECT token_hash FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_ne!(stored, created.token);
        assert_eq!(stored, hash_token(&created.token));
    }

    #[test]
    fn test_revoke_session_is_one_shot() {
        let repo = setup_test_db();
        let created = repo
            .create_session("user-1", chrono::Duration::days(1))
            .unwrap();
        assert!(repo.revoke_session(&created.session.id).unwrap());
        assert!(!repo.revoke_session(&created.session.id).unwrap());
        assert!(!repo.revoke_session("unknown").unwrap());

        let session = repo.get_session(&created.session.id).unwrap().unwrap();
        assert!(session.revoked_at.is_some());
        assert!(!session.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_revoke_subject_sessions() {
        let repo = setup_test_db();
        let a = repo.create_session("user-1", chrono::Duration::days(1)).unwrap();
        let b = repo.create_session("user-1", chrono::Duration::days(1)).unwrap();
        let other = repo.create_session("user-2", chrono::Duration::days(1)).unwrap();

        let mut revoked = repo.revoke_subject_sessions("user-1").unwrap();
        revoked.sort();
        let mut expected = vec![a.session.id, b.session.id];
        expected.sort();
        assert_eq!(revoked, expected);

        let untouched = repo.get_session(&other.session.id).unwrap().unwrap();
        assert!(untouched.revoked_at.is_none());
    }

    #[test]
    fn test_expired_session_is_invalid_and_cleaned_up() {
        let repo = setup_test_db();
        let expired = repo
            .create_session("user-1", chrono::Duration::seconds(-10))
            .unwrap();
        let live = repo.create_session("user-1", chrono::Duration::days(1)).unwrap();

        let found = repo.find_by_token(&expired.token).unwrap().unwrap();
        assert!(!found.is_valid_at(Utc::now()));

        let deleted = repo
            .cleanup_expired_sessions(chrono::Duration::days(1))
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get_session(&live.session.id).unwrap().is_some());
    }
}
