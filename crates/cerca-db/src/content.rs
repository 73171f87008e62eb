use cerca_types::models::Post;

use crate::clock::from_unix;
use crate::error::{DbError, Environ, Result};
use crate::{Database, exists};

impl Database {
    // -- Threads --

    /// Creates a thread together with its opening post. Returns
    /// `(thread_id, post_id)`.
    pub fn create_thread(
        &self,
        title: &str,
        topic_id: i64,
        author_id: i64,
        content: &str,
    ) -> Result<(i64, i64)> {
        let now = self.now().timestamp();
        self.with_tx("create thread", |tx| {
            let thread_id: i64 = tx
                .query_row(
                    "INSERT INTO threads (title, publishtime, topicid, authorid)
                     VALUES (?1, ?2, ?3, ?4) RETURNING id",
                    (title, now, topic_id, author_id),
                    |row| row.get(0),
                )
                .environ("create thread: insert into threads table")?;

            let post_id: i64 = tx
                .query_row(
                    "INSERT INTO posts (content, publishtime, authorid, threadid)
                     VALUES (?1, ?2, ?3, ?4) RETURNING id",
                    (content, now, author_id, thread_id),
                    |row| row.get(0),
                )
                .environ("create thread: insert into posts table")?;

            Ok((thread_id, post_id))
        })
    }

    pub fn create_post(&self, thread_id: i64, author_id: i64, content: &str) -> Result<i64> {
        let now = self.now().timestamp();
        self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO posts (content, publishtime, authorid, threadid)
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                (content, now, author_id, thread_id),
                |row| row.get(0),
            )
            .environ("create post")
        })
    }

    /// All posts of a thread in publishing order.
    pub fn get_thread(&self, thread_id: i64) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            let found = exists(conn, "SELECT 1 FROM threads WHERE id = ?1", [thread_id])
                .environ("get thread")?;
            if !found {
                return Err(DbError::not_found("get thread"));
            }

            // JOIN users to fetch the author name in the same query
            let mut stmt = conn
                .prepare(
                    "SELECT p.id, p.threadid, p.authorid, u.name, p.content,
                            p.publishtime, p.lastedit
                     FROM posts p
                     INNER JOIN users u ON u.id = p.authorid
                     WHERE p.threadid = ?1
                     ORDER BY p.publishtime, p.id",
                )
                .environ("get thread")?;

            let posts = stmt
                .query_map([thread_id], |row| {
                    Ok(Post {
                        id: row.get(0)?,
                        thread_id: row.get(1)?,
                        author_id: row.get(2)?,
                        author_name: row.get(3)?,
                        content: row.get(4)?,
                        publish_time: from_unix(row.get(5)?),
                        last_edit: row.get::<_, Option<i64>>(6)?.map(from_unix),
                    })
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .environ("get thread")?;

            Ok(posts)
        })
    }
}
