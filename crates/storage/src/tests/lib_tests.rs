use super::*;

async fn put(storage: &Storage, key: &str, value: &str) {
    sqlx::query("INSERT INTO client_kv (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(&storage.pool)
        .await
        .expect("insert");
}

fn doctor() -> DoctorId {
    DoctorId(Uuid::parse_str("6f1c2a52-4a4e-4f62-9a55-0d2f0c6f9b11").expect("uuid"))
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn doctor_session_round_trips_and_clears() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage
        .load_doctor_session()
        .await
        .expect("load empty")
        .is_none());

    storage
        .save_doctor_session(doctor(), "Dr. Mehta", Some("Cardiology"), None)
        .await
        .expect("save");

    let session = storage
        .load_doctor_session()
        .await
        .expect("load")
        .expect("session present");
    assert_eq!(session.doctor_id, doctor());
    assert_eq!(session.name, "Dr. Mehta");
    assert_eq!(session.specialization.as_deref(), Some("Cardiology"));
    assert_eq!(session.department_name, None);

    storage.clear_doctor_session().await.expect("clear");
    assert!(storage
        .load_doctor_session()
        .await
        .expect("load after clear")
        .is_none());
}

#[tokio::test]
async fn partial_session_reads_as_signed_out() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    put(&storage, DOCTOR_ID_KEY, &doctor().to_string()).await;
    assert!(storage
        .load_doctor_session()
        .await
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn corrupt_doctor_id_is_reported() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    put(&storage, DOCTOR_ID_KEY, "not-a-uuid").await;
    put(&storage, DOCTOR_NAME_KEY, "Dr. X").await;
    let err = storage.load_doctor_session().await.expect_err("corrupt id");
    assert!(err.to_string().contains("not a uuid"));
}

#[tokio::test]
async fn saving_again_replaces_the_previous_doctor() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_doctor_session(doctor(), "Dr. Mehta", Some("Cardiology"), Some("Heart Centre"))
        .await
        .expect("first");
    storage
        .save_doctor_session(doctor(), "Dr. Mehta", None, None)
        .await
        .expect("second");

    let session = storage
        .load_doctor_session()
        .await
        .expect("load")
        .expect("session present");
    assert_eq!(session.specialization, None);
    assert_eq!(session.department_name, None);
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("hospital_queue_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("client.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    storage
        .save_doctor_session(doctor(), "Dr. Rao", None, Some("ENT"))
        .await
        .expect("save");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let session = reopened
        .load_doctor_session()
        .await
        .expect("load")
        .expect("persisted session");
    assert_eq!(session.department_name.as_deref(), Some("ENT"));
    drop(reopened);

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}
