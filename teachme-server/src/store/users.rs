//! User accounts and teacher/student friendship relations.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use teachme_common::{Error, Result};
use uuid::Uuid;

use super::Database;

/// Role of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Teacher,
    Student,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            other => Err(Error::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// User record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user id
    pub id: String,
    /// Email address used for login
    pub email: String,
    /// Display username
    pub username: String,
    /// Argon2 password hash (never exposed in API responses)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Teacher or student
    pub role: UserRole,
    /// Emails of friends. A teacher's friends are students and vice versa.
    pub friends: Vec<String>,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

/// Request to register a new user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub role: UserRole,
}

/// Minimal public view of a friend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendInfo {
    pub email: String,
    pub username: String,
}

/// Minimal public view of a student account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentInfo {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub username: String,
}

/// Collection of user accounts.
#[derive(Clone)]
pub struct UserCollection {
    db: Database,
}

impl UserCollection {
    pub(super) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a new user. Fails on duplicate email or empty fields.
    pub fn register(&self, request: &NewUser) -> Result<User> {
        if request.email.trim().is_empty() {
            return Err(Error::InvalidInput("email cannot be empty".into()));
        }
        if request.username.trim().is_empty() {
            return Err(Error::InvalidInput("username cannot be empty".into()));
        }
        if request.password.len() < 8 {
            return Err(Error::InvalidInput(
                "password must be at least 8 characters".into(),
            ));
        }

        if self.find_by_email(&request.email)?.is_some() {
            return Err(Error::InvalidInput(format!(
                "user {} already exists",
                request.email
            )));
        }

        let password_hash = hash_password(&request.password)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO users (id, email, username, password_hash, role, friends, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6)",
            params![
                id,
                request.email,
                request.username,
                password_hash,
                request.role.as_str(),
                now,
            ],
        )?;

        Ok(User {
            id,
            email: request.email.clone(),
            username: request.username.clone(),
            password_hash,
            role: request.role,
            friends: Vec::new(),
            created_at: now,
        })
    }

    /// Get a user by id.
    pub fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        self.find_internal("id", id)
    }

    /// Get a user by email.
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_internal("email", email)
    }

    fn find_internal(&self, field: &str, value: &str) -> Result<Option<User>> {
        let conn = self.db.lock()?;
        let query = format!(
            "SELECT id, email, username, password_hash, role, friends, created_at
             FROM users WHERE {field} = ?1"
        );

        let user = conn
            .query_row(&query, params![value], |row| {
                let role: String = row.get(4)?;
                let friends_json: String = row.get(5)?;
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    username: row.get(2)?,
                    password_hash: row.get(3)?,
                    role: UserRole::parse(&role).unwrap_or(UserRole::Student),
                    friends: serde_json::from_str(&friends_json).unwrap_or_default(),
                    created_at: row.get(6)?,
                })
            })
            .optional()?;

        Ok(user)
    }

    /// Verify a user's password, returning the account on success.
    pub fn verify_password(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.find_by_email(email)? else {
            return Ok(None);
        };

        if !verify_password(password, &user.password_hash)? {
            return Ok(None);
        }

        Ok(Some(user))
    }

    /// Create a friendship between a teacher and a student. Both users'
    /// friend lists are updated symmetrically.
    pub fn create_friendship(&self, teacher_email: &str, student_email: &str) -> Result<()> {
        let teacher = self
            .find_by_email(teacher_email)?
            .ok_or_else(|| Error::NotFound(format!("user {teacher_email} does not exist")))?;
        let student = self
            .find_by_email(student_email)?
            .ok_or_else(|| Error::NotFound(format!("user {student_email} does not exist")))?;

        self.add_friend(&teacher, student_email)?;
        self.add_friend(&student, teacher_email)?;
        Ok(())
    }

    /// Remove a friendship between a teacher and a student.
    pub fn remove_friendship(&self, teacher_email: &str, student_email: &str) -> Result<()> {
        let teacher = self
            .find_by_email(teacher_email)?
            .ok_or_else(|| Error::NotFound(format!("user {teacher_email} does not exist")))?;
        let student = self
            .find_by_email(student_email)?
            .ok_or_else(|| Error::NotFound(format!("user {student_email} does not exist")))?;

        self.drop_friend(&teacher, student_email)?;
        self.drop_friend(&student, teacher_email)?;
        Ok(())
    }

    fn add_friend(&self, user: &User, friend_email: &str) -> Result<()> {
        let mut friends = user.friends.clone();
        if !friends.iter().any(|f| f == friend_email) {
            friends.push(friend_email.to_string());
        }
        self.store_friends(&user.id, &friends)
    }

    fn drop_friend(&self, user: &User, friend_email: &str) -> Result<()> {
        let mut friends = user.friends.clone();
        friends.retain(|f| f != friend_email);
        self.store_friends(&user.id, &friends)
    }

    fn store_friends(&self, user_id: &str, friends: &[String]) -> Result<()> {
        let friends_json = serde_json::to_string(friends)?;
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE users SET friends = ?1 WHERE id = ?2",
            params![friends_json, user_id],
        )?;
        Ok(())
    }

    /// The friends of a user: a teacher's students, or a student's teachers.
    pub fn friends_of(&self, email: &str) -> Result<Vec<FriendInfo>> {
        let user = self
            .find_by_email(email)?
            .ok_or_else(|| Error::NotFound(format!("user {email} does not exist")))?;

        let mut friends = Vec::with_capacity(user.friends.len());
        for friend_email in &user.friends {
            if let Some(friend) = self.find_by_email(friend_email)? {
                friends.push(FriendInfo {
                    email: friend.email,
                    username: friend.username,
                });
            }
        }
        Ok(friends)
    }

    /// All registered student accounts.
    pub fn all_students(&self) -> Result<Vec<StudentInfo>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, email, username FROM users WHERE role = 'student' ORDER BY created_at",
        )?;

        let students = stmt
            .query_map([], |row| {
                Ok(StudentInfo {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    username: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(students)
    }
}

/// Hash a password using Argon2.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Internal(format!("failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| Error::Internal(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
