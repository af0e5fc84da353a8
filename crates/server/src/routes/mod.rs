use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod admin;
mod appointments;
mod auth;
mod health;
mod invite;
mod leads;
mod meetings;
mod pipelines;
mod profiles;
mod roles;
mod schedule_blocks;
mod ws;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Auth routes
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/me", get(auth::me))
        // Tenant data
        .route("/leads", get(leads::list).post(leads::create))
        .route("/leads/:id", patch(leads::update).delete(leads::delete))
        .route("/appointments", get(appointments::list).post(appointments::create))
        .route(
            "/appointments/:id",
            patch(appointments::update).delete(appointments::delete),
        )
        .route("/meetings", get(meetings::list).post(meetings::create))
        .route("/meetings/:id", patch(meetings::update).delete(meetings::delete))
        .route(
            "/schedule-blocks",
            get(schedule_blocks::list).post(schedule_blocks::create),
        )
        .route("/schedule-blocks/check", post(schedule_blocks::check))
        .route("/schedule-blocks/:id", delete(schedule_blocks::delete))
        .route("/profiles", get(profiles::list))
        .route("/profiles/:id", patch(profiles::update))
        .route("/roles", get(roles::list).post(roles::create))
        .route("/roles/:id", patch(roles::update).delete(roles::delete))
        .route("/permissions", get(roles::my_permissions))
        .route("/permissions/:role_name", put(roles::set_permissions))
        .route("/pipelines", get(pipelines::list).post(pipelines::create))
        .route("/pipelines/:id", delete(pipelines::delete))
        .route("/pipelines/:id/columns", post(pipelines::add_column))
        .route(
            "/pipeline-columns/:id",
            patch(pipelines::update_column).delete(pipelines::delete_column),
        )
        // SaaS analytics
        .route("/admin/companies", get(admin::companies))
        .route("/admin/users", get(admin::users))
        // Serverless functions
        .route(
            "/functions/invite-user",
            post(invite::invite_user).options(invite::preflight),
        )
        // Change feed
        .route("/ws", get(ws::ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, db::Database};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use shared::{RowFilter, ServerToClient, Table, TableSubscription};
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_app() -> (Router, AppState) {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        let mut config = Config::default();
        config.admin.emails = vec!["ops@crm.local".to_string()];
        let state = AppState::new(db, config);
        (create_router(state.clone()), state)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Registers a company owner and returns (token, user_id)
    async fn register_owner(app: &Router, email: &str, company: &str) -> (String, Uuid) {
        let (status, body) = call(
            app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "email": email,
                "password": "secret123",
                "full_name": "Owner",
                "company_name": company,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        (
            body["token"].as_str().unwrap().to_string(),
            body["user_id"].as_str().unwrap().parse().unwrap(),
        )
    }

    /// Creates a member with a system role through the invite function and logs in
    async fn add_member(app: &Router, state: &AppState, admin_token: &str, email: &str, role: &str) -> (String, Uuid) {
        let role = state.db.get_system_role_by_name(role).await.unwrap().unwrap();
        let (status, body) = call(
            app,
            Method::POST,
            "/functions/invite-user",
            Some(admin_token),
            Some(json!({
                "email": email,
                "role_id": role.id,
                "password": "secret123",
                "create_with_password": true,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["created_directly"], true);

        let (status, body) = call(
            app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"email": email, "password": "secret123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (
            body["token"].as_str().unwrap().to_string(),
            body["user_id"].as_str().unwrap().parse().unwrap(),
        )
    }

    fn ids(list: &Value) -> Vec<String> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|row| row["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app().await;
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_register_creates_company_admin() {
        let (app, _) = test_app().await;
        let (token, user_id) = register_owner(&app, "owner@acme.test", "Acme").await;

        let (status, me) = call(&app, Method::GET, "/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["profile"]["id"], user_id.to_string());
        assert_eq!(me["role_name"], "Admin");
        assert_eq!(me["company"]["name"], "Acme");
        assert_eq!(me["permissions"]["settings"]["delete"], true);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_missing_company() {
        let (app, _) = test_app().await;
        register_owner(&app, "owner@acme.test", "Acme").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({"email": "owner@acme.test", "password": "secret123", "full_name": "X", "company_name": "B"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({"email": "new@acme.test", "password": "secret123", "full_name": "X"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password() {
        let (app, _) = test_app().await;
        register_owner(&app, "owner@acme.test", "Acme").await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"email": "owner@acme.test", "password": "nope-nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_requests_without_token_are_unauthorized() {
        let (app, _) = test_app().await;
        let (status, _) = call(&app, Method::GET, "/leads", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_closer_sees_own_and_unassigned_leads_only() {
        let (app, state) = test_app().await;
        let (admin, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (closer, closer_id) = add_member(&app, &state, &admin, "closer@acme.test", "Closer").await;
        let (seller, seller_id) = add_member(&app, &state, &admin, "seller@acme.test", "Vendedor").await;

        let mut created = Vec::new();
        for (name, assigned_to) in [
            ("Unassigned", Value::Null),
            ("Mine", json!(closer_id)),
            ("Theirs", json!(seller_id)),
        ] {
            let (status, lead) = call(
                &app,
                Method::POST,
                "/leads",
                Some(&admin),
                Some(json!({"name": name, "assigned_to": assigned_to})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            created.push(lead["id"].as_str().unwrap().to_string());
        }

        let (_, closer_view) = call(&app, Method::GET, "/leads", Some(&closer), None).await;
        let closer_ids = ids(&closer_view);
        assert_eq!(closer_ids.len(), 2);
        assert!(closer_ids.contains(&created[0]));
        assert!(closer_ids.contains(&created[1]));

        let (_, seller_view) = call(&app, Method::GET, "/leads", Some(&seller), None).await;
        assert_eq!(ids(&seller_view).len(), 3);
        assert!(ids(&seller_view).contains(&created[0]));

        // A Closer cannot touch a lead they cannot see
        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("/leads/{}", created[2]),
            Some(&closer),
            Some(json!({"notes": "mine now"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_lead_patch_can_unassign() {
        let (app, _) = test_app().await;
        let (admin, admin_id) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (_, lead) = call(
            &app,
            Method::POST,
            "/leads",
            Some(&admin),
            Some(json!({"name": "Maria", "assigned_to": admin_id})),
        )
        .await;
        assert_eq!(lead["status"], "new");

        let (status, patched) = call(
            &app,
            Method::PATCH,
            &format!("/leads/{}", lead["id"].as_str().unwrap()),
            Some(&admin),
            Some(json!({"assigned_to": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["assigned_to"], Value::Null);
        assert_eq!(patched["name"], "Maria");
    }

    #[tokio::test]
    async fn test_assignee_must_belong_to_the_company() {
        let (app, _) = test_app().await;
        let (acme, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (_, outsider_id) = register_owner(&app, "owner@globex.test", "Globex").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/leads",
            Some(&acme),
            Some(json!({"name": "Maria", "assigned_to": outsider_id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

        let (status, _) = call(
            &app,
            Method::POST,
            "/leads",
            Some(&acme),
            Some(json!({"name": "Maria", "assigned_to": Uuid::new_v4()})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, lead) = call(&app, Method::POST, "/leads", Some(&acme), Some(json!({"name": "Maria"}))).await;
        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("/leads/{}", lead["id"].as_str().unwrap()),
            Some(&acme),
            Some(json!({"assigned_to": outsider_id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            "/appointments",
            Some(&acme),
            Some(json!({"assigned_to": outsider_id, "date": "2026-03-02", "time": "10:00:00", "duration": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, appointment) = call(
            &app,
            Method::POST,
            "/appointments",
            Some(&acme),
            Some(json!({"date": "2026-03-02", "time": "10:00:00", "duration": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("/appointments/{}", appointment["id"].as_str().unwrap()),
            Some(&acme),
            Some(json!({"assigned_to": outsider_id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let (app, _) = test_app().await;
        let (acme, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (globex, _) = register_owner(&app, "owner@globex.test", "Globex").await;

        let (_, lead) = call(&app, Method::POST, "/leads", Some(&acme), Some(json!({"name": "Acme lead"}))).await;

        let (_, globex_view) = call(&app, Method::GET, "/leads", Some(&globex), None).await;
        assert!(globex_view.as_array().unwrap().is_empty());

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/leads/{}", lead["id"].as_str().unwrap()),
            Some(&globex),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_appointment_on_blocked_slot_conflicts() {
        let (app, _) = test_app().await;
        let (admin, admin_id) = register_owner(&app, "owner@acme.test", "Acme").await;

        let (status, block) = call(
            &app,
            Method::POST,
            "/schedule-blocks",
            Some(&admin),
            Some(json!({
                "block_type": "time_slot",
                "start_date": "2026-03-02",
                "start_time": "10:00:00",
                "end_time": "11:00:00",
                "reason": "Dentist",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, check) = call(
            &app,
            Method::POST,
            "/schedule-blocks/check",
            Some(&admin),
            Some(json!({"user_id": admin_id, "date": "2026-03-02", "time": "09:59:00", "duration": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(check["blocked"], true);
        assert_eq!(check["block_id"], block["id"]);

        let (status, body) = call(
            &app,
            Method::POST,
            "/appointments",
            Some(&admin),
            Some(json!({"assigned_to": admin_id, "date": "2026-03-02", "time": "10:30:00", "duration": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "CONFLICT");

        // Touching the end of the block is fine
        let (status, appointment) = call(
            &app,
            Method::POST,
            "/appointments",
            Some(&admin),
            Some(json!({"assigned_to": admin_id, "date": "2026-03-02", "time": "11:00:00", "duration": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(appointment["assignee_name"], "Owner");
        assert_eq!(appointment["status"], "scheduled");

        // Moving it into the block conflicts as well
        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("/appointments/{}", appointment["id"].as_str().unwrap()),
            Some(&admin),
            Some(json!({"time": "10:15:00"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_appointment_list_joins_lead_name() {
        let (app, _) = test_app().await;
        let (admin, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (_, lead) = call(&app, Method::POST, "/leads", Some(&admin), Some(json!({"name": "Maria"}))).await;
        call(
            &app,
            Method::POST,
            "/appointments",
            Some(&admin),
            Some(json!({"lead_id": lead["id"], "date": "2026-03-02", "time": "09:00:00", "duration": 45})),
        )
        .await;

        let (_, list) = call(&app, Method::GET, "/appointments", Some(&admin), None).await;
        assert_eq!(list[0]["lead_name"], "Maria");
        assert_eq!(list[0]["duration"], 45);

        // Deleting the lead leaves a dangling reference for the join
        call(&app, Method::DELETE, &format!("/leads/{}", lead["id"].as_str().unwrap()), Some(&admin), None).await;
        let (_, list) = call(&app, Method::GET, "/appointments", Some(&admin), None).await;
        assert_eq!(list[0]["lead_name"], Value::Null);
    }

    #[tokio::test]
    async fn test_meetings_keep_participants() {
        let (app, state) = test_app().await;
        let (admin, admin_id) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (_, seller_id) = add_member(&app, &state, &admin, "seller@acme.test", "Vendedor").await;

        let (status, meeting) = call(
            &app,
            Method::POST,
            "/meetings",
            Some(&admin),
            Some(json!({
                "title": "Weekly",
                "date": "2026-03-03",
                "time": "08:00:00",
                "participant_ids": [seller_id, admin_id, seller_id],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(meeting["duration"], 60);
        assert_eq!(meeting["participants"].as_array().unwrap().len(), 2);

        let (_, list) = call(&app, Method::GET, "/meetings", Some(&admin), None).await;
        assert_eq!(list[0]["participants"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_permission_override_applies_to_role() {
        let (app, state) = test_app().await;
        let (admin, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (seller, _) = add_member(&app, &state, &admin, "seller@acme.test", "Vendedor").await;

        let (status, _) = call(&app, Method::POST, "/leads", Some(&seller), Some(json!({"name": "A"}))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, resolved) = call(
            &app,
            Method::PUT,
            "/permissions/Vendedor",
            Some(&admin),
            Some(json!({"leads": {"view": true, "create": false}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["map"]["leads"]["create"], false);

        let (status, _) = call(&app, Method::POST, "/leads", Some(&seller), Some(json!({"name": "B"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, mine) = call(&app, Method::GET, "/permissions", Some(&seller), None).await;
        assert_eq!(mine["role_name"], "Vendedor");
        assert_eq!(mine["map"]["appointments"], Value::Null);

        // Only settings editors may override
        let (status, _) = call(
            &app,
            Method::PUT,
            "/permissions/Vendedor",
            Some(&seller),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_cannot_lock_out_own_role() {
        let (app, state) = test_app().await;
        let (admin, admin_id) = register_owner(&app, "owner@acme.test", "Acme").await;
        let company_id = state.db.get_profile(admin_id).await.unwrap().unwrap().company_id.unwrap();

        let connection = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.realtime.register(connection, tx);
        state
            .realtime
            .authenticate(&connection, admin_id, Some(company_id), Some("Admin".to_string()));
        state
            .realtime
            .subscribe(
                &connection,
                "permissions",
                vec![TableSubscription::all(Table::CompanyRolePermissions)],
            )
            .unwrap();

        let (status, _) = call(
            &app,
            Method::PUT,
            "/permissions/Admin",
            Some(&admin),
            Some(json!({"leads": {"view": true}})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(rx.try_recv().is_err());

        // The refused override left the default table in force
        let (_, mine) = call(&app, Method::GET, "/permissions", Some(&admin), None).await;
        assert_eq!(mine["map"]["settings"]["edit"], true);

        // Other roles can still be narrowed, and listeners hear about it
        let (status, _) = call(
            &app,
            Method::PUT,
            "/permissions/Closer",
            Some(&admin),
            Some(json!({"leads": {"view": true}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        match rx.try_recv().unwrap() {
            ServerToClient::Change { channel, change } => {
                assert_eq!(channel, "permissions");
                let record = change.record.unwrap();
                assert_eq!(record["role_name"], "Closer");
                assert_eq!(record["permissions"]["leads"]["view"], true);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_custom_role_lifecycle() {
        let (app, state) = test_app().await;
        let (admin, admin_id) = register_owner(&app, "owner@acme.test", "Acme").await;
        let company_id = state.db.get_profile(admin_id).await.unwrap().unwrap().company_id.unwrap();

        let (status, _) = call(&app, Method::POST, "/roles", Some(&admin), Some(json!({"name": "Closer"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, role) = call(
            &app,
            Method::POST,
            "/roles",
            Some(&admin),
            Some(json!({"name": "Suporte", "permissions": {"leads": {"view": true}}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(role["is_system_role"], false);

        let (_, roles) = call(&app, Method::GET, "/roles", Some(&admin), None).await;
        assert_eq!(roles.as_array().unwrap().len(), 5);

        let system_id = roles
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["name"] == "Admin")
            .map(|r| r["id"].as_str().unwrap().to_string())
            .unwrap();
        let (status, _) = call(&app, Method::DELETE, &format!("/roles/{}", system_id), Some(&admin), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/roles/{}", role["id"].as_str().unwrap()),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.db.get_permission_override(company_id, "Suporte").await.unwrap().is_none());

        // A role recreated under the same name starts from its own permissions
        let (status, _) = call(&app, Method::POST, "/roles", Some(&admin), Some(json!({"name": "Suporte"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let map = state.db.get_permission_override(company_id, "Suporte").await.unwrap().unwrap();
        assert_eq!(map.get("leads", "view"), None);
    }

    #[tokio::test]
    async fn test_pipeline_columns_append_in_order() {
        let (app, _) = test_app().await;
        let (admin, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (_, pipeline) = call(&app, Method::POST, "/pipelines", Some(&admin), Some(json!({"name": "Sales"}))).await;
        let path = format!("/pipelines/{}/columns", pipeline["id"].as_str().unwrap());

        for name in ["New", "Qualified", "Won"] {
            let (status, _) = call(&app, Method::POST, &path, Some(&admin), Some(json!({"name": name}))).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, list) = call(&app, Method::GET, "/pipelines", Some(&admin), None).await;
        let columns = list[0]["columns"].as_array().unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2]["name"], "Won");
        assert_eq!(columns[2]["position"], 2);
        assert_eq!(columns[0]["color"], "#64748b");
    }

    #[tokio::test]
    async fn test_invite_creates_invitation_and_registers_invitee() {
        let (app, state) = test_app().await;
        let (admin, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let closer = state.db.get_system_role_by_name("Closer").await.unwrap().unwrap();

        let (status, body) = call(
            &app,
            Method::POST,
            "/functions/invite-user",
            Some(&admin),
            Some(json!({"email": "New@Acme.test", "role_id": closer.id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["created_directly"], false);
        assert_eq!(body["user_id"], Value::Null);
        assert_eq!(body["invitation"]["email"], "new@acme.test");
        assert_eq!(body["invitation"]["sent_via_email"], false);
        assert!(body["invitation"].get("token").is_none());

        let invitation_id: Uuid = body["invitation"]["id"].as_str().unwrap().parse().unwrap();
        let token: String = sqlx::query_scalar("SELECT token FROM invitations WHERE id = ?")
            .bind(invitation_id)
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
        assert_eq!(token.len(), 32);

        let (status, registered) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "email": "new@acme.test",
                "password": "secret123",
                "full_name": "New Closer",
                "invitation_token": token,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, me) = call(&app, Method::GET, "/me", registered["token"].as_str(), None).await;
        assert_eq!(me["role_name"], "Closer");
        assert_eq!(me["company"]["name"], "Acme");

        // Invitations are single use
        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "email": "new@acme.test",
                "password": "secret123",
                "full_name": "Again",
                "invitation_token": token,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invite_failures_use_function_format() {
        let (app, state) = test_app().await;
        let (admin, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (closer, _) = add_member(&app, &state, &admin, "closer@acme.test", "Closer").await;
        let role = state.db.get_system_role_by_name("Vendedor").await.unwrap().unwrap();
        let payload = json!({"email": "x@acme.test", "role_id": role.id});

        let (status, body) = call(&app, Method::POST, "/functions/invite-user", None, Some(payload.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());

        let (status, body) =
            call(&app, Method::POST, "/functions/invite-user", Some(&closer), Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = call(
            &app,
            Method::POST,
            "/functions/invite-user",
            Some(&admin),
            Some(json!({"email": "x@acme.test"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_invite_preflight() {
        let (app, _) = test_app().await;
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/functions/invite-user")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_admin_analytics_restricted_to_platform_admins() {
        let (app, _) = test_app().await;
        let (owner, _) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (ops, _) = register_owner(&app, "ops@crm.local", "Ops").await;
        call(&app, Method::POST, "/leads", Some(&owner), Some(json!({"name": "A"}))).await;

        let (status, _) = call(&app, Method::GET, "/admin/companies", Some(&owner), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, stats) = call(&app, Method::GET, "/admin/companies", Some(&ops), None).await;
        assert_eq!(status, StatusCode::OK);
        let acme = stats
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == "Acme")
            .unwrap();
        assert_eq!(acme["lead_count"], 1);
        assert_eq!(acme["user_count"], 1);

        let (_, users) = call(&app, Method::GET, "/admin/users", Some(&ops), None).await;
        assert_eq!(users.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mutations_reach_realtime_subscribers() {
        let (app, state) = test_app().await;
        let (admin, admin_id) = register_owner(&app, "owner@acme.test", "Acme").await;
        let (other, _) = register_owner(&app, "owner@globex.test", "Globex").await;
        let company_id = state.db.get_profile(admin_id).await.unwrap().unwrap().company_id.unwrap();

        let connection = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.realtime.register(connection, tx);
        state
            .realtime
            .authenticate(&connection, admin_id, Some(company_id), Some("Admin".to_string()));
        state
            .realtime
            .subscribe(
                &connection,
                "leads-test",
                vec![TableSubscription::all(Table::Leads).with_filter(RowFilter::eq("company_id", company_id))],
            )
            .unwrap();

        call(&app, Method::POST, "/leads", Some(&other), Some(json!({"name": "Foreign"}))).await;
        let (_, lead) = call(&app, Method::POST, "/leads", Some(&admin), Some(json!({"name": "Local"}))).await;

        match rx.try_recv().unwrap() {
            ServerToClient::Change { channel, change } => {
                assert_eq!(channel, "leads-test");
                assert_eq!(change.record.unwrap()["id"], lead["id"]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
