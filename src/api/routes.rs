use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::health::HealthReport;
use crate::collector::orchestrator::{PropMatch, UpcomingGames};
use crate::collector::{CollectionOrchestrator, SchedulerHandle};
use crate::error::{AppError, EvalError};
use crate::evaluator::PickEvaluator;
use crate::selector::select_best_prop;
use crate::types::{BestLine, CollectionRun, MarketType, PickMetric, PlayerProp, Side, Sport};

const DEFAULT_RUNS_LIMIT: usize = 20;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<CollectionOrchestrator>,
    pub evaluator: Arc<PickEvaluator>,
    pub scheduler: SchedulerHandle,
    /// Sports reported on by /health
    pub sports: Vec<Sport>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/games/upcoming/:sport", get(get_upcoming_games))
        .route("/games/:game_id/best-line", get(get_best_line))
        .route("/games/:game_id/evaluate", get(get_evaluation))
        .route("/props", get(get_props))
        .route("/props/evaluate", get(get_prop_evaluation))
        .route("/collect/:sport", post(post_collect))
        .route("/runs", get(get_runs))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MarketQuery {
    pub market: Option<String>,
}

#[derive(Deserialize)]
pub struct EvaluateQuery {
    pub market: Option<String>,
    pub side: String,
    /// Omitted: the built-in estimator supplies one.
    pub model_probability: Option<f64>,
}

#[derive(Deserialize)]
pub struct PropsQuery {
    pub player: Option<String>,
    pub sport: Option<String>,
    pub market: Option<String>,
}

#[derive(Deserialize)]
pub struct PropEvaluateQuery {
    pub player: String,
    pub market: String,
    pub side: String,
    pub model_probability: f64,
    pub sport: Option<String>,
    /// Restrict to one book; otherwise the best price at the most common line is used.
    pub book: Option<String>,
}

#[derive(Deserialize)]
pub struct CollectQuery {
    /// false: queue on the scheduler and return immediately
    pub wait: Option<bool>,
}

#[derive(Deserialize)]
pub struct RunsQuery {
    pub sport: Option<String>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectResponse {
    Completed { run: CollectionRun },
    Queued { sport: Sport },
    Coalesced { sport: Sport },
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_upcoming_games(
    State(state): State<ApiState>,
    Path(sport): Path<String>,
) -> Result<Json<UpcomingGames>, AppError> {
    let sport = parse_sport(&sport)?;
    Ok(Json(state.orchestrator.upcoming_games(sport)))
}

async fn get_best_line(
    State(state): State<ApiState>,
    Path(game_id): Path<String>,
    Query(params): Query<MarketQuery>,
) -> Result<Json<BestLine>, AppError> {
    let market = parse_market(params.market.as_deref())?;
    let line = state
        .evaluator
        .best_line(&game_id, market)
        .ok_or_else(|| EvalError::MetricsUnavailable(format!("no {market} line for {game_id}")))?;
    Ok(Json(line))
}

async fn get_evaluation(
    State(state): State<ApiState>,
    Path(game_id): Path<String>,
    Query(params): Query<EvaluateQuery>,
) -> Result<Json<PickMetric>, AppError> {
    let market = parse_market(params.market.as_deref())?;
    let side: Side = params.side.parse().map_err(AppError::BadRequest)?;
    let metric = state
        .evaluator
        .evaluate_best_line(&game_id, market, side, params.model_probability)?;
    Ok(Json(metric))
}

async fn get_props(
    State(state): State<ApiState>,
    Query(params): Query<PropsQuery>,
) -> Result<Json<Vec<PropMatch>>, AppError> {
    let player = params
        .player
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("player is required".into()))?;
    let sport = params.sport.as_deref().map(parse_sport).transpose()?;
    Ok(Json(state.orchestrator.search_props(player, sport, params.market.as_deref())))
}

async fn get_prop_evaluation(
    State(state): State<ApiState>,
    Query(params): Query<PropEvaluateQuery>,
) -> Result<Json<PickMetric>, AppError> {
    let sport = params.sport.as_deref().map(parse_sport).transpose()?;
    let side: Side = params.side.parse().map_err(AppError::BadRequest)?;
    if !matches!(side, Side::Over | Side::Under) {
        return Err(AppError::BadRequest(format!("props take over or under, not {side}")));
    }

    let matches: Vec<PlayerProp> = state
        .orchestrator
        .search_props(&params.player, sport, Some(&params.market))
        .into_iter()
        .map(|m| m.prop)
        .filter(|p| params.book.as_deref().map_or(true, |b| p.book == b))
        .collect();

    let players: BTreeSet<&str> = matches.iter().map(|p| p.player.as_str()).collect();
    if players.len() > 1 {
        let names: Vec<&str> = players.into_iter().collect();
        return Err(AppError::BadRequest(format!(
            "player '{}' is ambiguous: {}",
            params.player,
            names.join(", ")
        )));
    }

    let refs: Vec<&PlayerProp> = matches.iter().collect();
    let best = select_best_prop(&refs, side).ok_or_else(|| {
        EvalError::MetricsUnavailable(format!("no {side} price for {} {}", params.player, params.market))
    })?;

    Ok(Json(state.evaluator.evaluate_prop(best, side, params.model_probability)?))
}

async fn post_collect(
    State(state): State<ApiState>,
    Path(sport): Path<String>,
    Query(params): Query<CollectQuery>,
) -> Result<Response, AppError> {
    let sport = parse_sport(&sport)?;

    if !params.wait.unwrap_or(true) {
        if !state.scheduler.trigger(sport) {
            warn!(sport = %sport, "Collection trigger rejected; scheduler queue unavailable");
            return Ok((StatusCode::SERVICE_UNAVAILABLE, "scheduler unavailable").into_response());
        }
        return Ok((StatusCode::ACCEPTED, Json(CollectResponse::Queued { sport })).into_response());
    }

    // Spawned so a dropped client connection cannot cancel the cycle mid-step.
    let orchestrator = Arc::clone(&state.orchestrator);
    let joined = tokio::spawn(async move { orchestrator.run_cycle(sport).await }).await?;

    let body = match joined {
        Ok(run) => {
            info!(sport = %sport, run_id = run.id, "On-demand collection finished");
            CollectResponse::Completed { run }
        }
        Err(coalesced) => CollectResponse::Coalesced { sport: coalesced.sport },
    };
    Ok(Json(body).into_response())
}

async fn get_runs(
    State(state): State<ApiState>,
    Query(params): Query<RunsQuery>,
) -> Result<Json<Vec<CollectionRun>>, AppError> {
    let sport = params.sport.as_deref().map(parse_sport).transpose()?;
    let limit = params.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    let mut runs = state.orchestrator.recent_runs(sport);
    runs.truncate(limit);
    Ok(Json(runs))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthReport> {
    Json(state.orchestrator.health_report(&state.sports))
}

fn parse_sport(raw: &str) -> Result<Sport, AppError> {
    raw.parse().map_err(AppError::BadRequest)
}

/// Moneyline when omitted.
fn parse_market(raw: Option<&str>) -> Result<MarketType, AppError> {
    match raw {
        None => Ok(MarketType::Moneyline),
        Some(m) => m.parse().map_err(AppError::BadRequest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::health::HealthState;
    use crate::api::latency::ProviderLatency;
    use crate::collector::{CollectorSettings, Scheduler};
    use crate::estimator::ProbabilityEstimator;
    use crate::providers::fake::{self, FakeOdds, FakeProps, FakeSchedule, Fakes};
    use crate::providers::teams::TeamDirectory;
    use crate::state::GameStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        scheduler: Scheduler,
    }

    fn test_app(fakes: &Fakes) -> TestApp {
        let store = GameStore::new();
        let orchestrator = CollectionOrchestrator::new(
            fakes.set(),
            Arc::clone(&store),
            Arc::new(ProviderLatency::new()),
            Arc::new(HealthState::new()),
            None,
            CollectorSettings {
                lookahead_days: 7,
                props_ttl: Duration::from_secs(300),
                schedule_stale_after: Duration::from_secs(3600),
                step_timeout: Duration::from_secs(5),
                run_history_limit: 10,
            },
        );
        let evaluator = PickEvaluator::new(
            store,
            ProbabilityEstimator::new(Arc::new(TeamDirectory::with_defaults())),
            0.05,
            1.0,
        );
        // No sports: nothing runs unless a test asks for it.
        let scheduler = Scheduler::start(
            Arc::clone(&orchestrator),
            vec![],
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        let state = ApiState {
            orchestrator,
            evaluator: Arc::new(evaluator),
            scheduler: scheduler.handle(),
            sports: vec![Sport::Nba],
        };
        TestApp { app: router(state), scheduler }
    }

    fn nba_fakes() -> Fakes {
        let fakes = Fakes::new(
            FakeSchedule::with_games(fake::slate(Sport::Nba, &["1"])),
            FakeOdds::default(),
            FakeProps::default(),
        );
        *fakes.odds.quotes.lock().unwrap() = vec![
            fake::quote("nba:1", MarketType::Moneyline, Side::Home, "dk", -110.0, None),
            fake::quote("nba:1", MarketType::Moneyline, Side::Home, "fd", -105.0, None),
            fake::quote("nba:1", MarketType::Moneyline, Side::Away, "dk", -110.0, None),
        ];
        *fakes.props.props.lock().unwrap() = vec![PlayerProp {
            sport: Sport::Nba,
            game_id: Some("nba:1".into()),
            player: "Jayson Tatum".into(),
            market: "player_points".into(),
            line: Some(27.5),
            over_price: Some(-115.0),
            under_price: Some(-105.0),
            book: "dk".into(),
            observed_at: None,
        }];
        fakes
    }

    async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()));
        (status, body)
    }

    #[tokio::test]
    async fn collect_then_read_endpoints() {
        let fakes = nba_fakes();
        let t = test_app(&fakes);

        let (status, body) = send(&t.app, Method::POST, "/collect/nba").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["run"]["outcome"], "success");

        let (status, body) = send(&t.app, Method::GET, "/games/upcoming/nba").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["games"].as_array().unwrap().len(), 1);
        assert_eq!(body["stale"], false);

        let (status, body) = send(&t.app, Method::GET, "/games/nba:1/best-line?market=moneyline").await;
        assert_eq!(status, StatusCode::OK);
        let home = body["sides"].as_array().unwrap().iter().find(|s| s["side"] == "home").unwrap();
        assert_eq!(home["book"], "fd");

        let (status, body) =
            send(&t.app, Method::GET, "/games/nba:1/evaluate?side=home&model_probability=0.55").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], -105.0);

        let (status, body) = send(&t.app, Method::GET, "/props?player=tatum&sport=nba").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["stale"], false);

        let (status, body) = send(
            &t.app,
            Method::GET,
            "/props/evaluate?player=tatum&market=player_points&side=under&model_probability=0.55",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], -105.0);
        assert_eq!(body["line"], 27.5);

        let (status, body) = send(&t.app, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cycles_total"], 1);
        assert_eq!(body["games_held"], 1);
        assert_eq!(body["per_sport_status"]["nba"]["last_outcome"], "success");

        let (_, body) = send(&t.app, Method::GET, "/runs?sport=nba").await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        t.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn error_statuses() {
        let fakes = nba_fakes();
        let t = test_app(&fakes);
        send(&t.app, Method::POST, "/collect/nba").await;

        let (status, _) = send(&t.app, Method::GET, "/games/upcoming/curling").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&t.app, Method::GET, "/props").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(&t.app, Method::GET, "/games/nba:1/evaluate?side=home&model_probability=1.5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&t.app, Method::GET, "/games/nba:1/best-line?market=total").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("metrics unavailable"));

        let (status, _) = send(&t.app, Method::GET, "/games/nba:404/evaluate?side=away&model_probability=0.5").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        t.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn queued_trigger_returns_accepted() {
        let fakes = nba_fakes();
        let t = test_app(&fakes);

        let (status, body) = send(&t.app, Method::POST, "/collect/nba?wait=false").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");

        for _ in 0..200 {
            let (_, runs) = send(&t.app, Method::GET, "/runs").await;
            if !runs.as_array().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        t.scheduler.shutdown().await;
        assert_eq!(fakes.schedule.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    fn points_prop(player: &str, book: &str, line: f64, over: f64) -> PlayerProp {
        PlayerProp {
            sport: Sport::Nba,
            game_id: Some("nba:1".into()),
            player: player.into(),
            market: "player_points".into(),
            line: Some(line),
            over_price: Some(over),
            under_price: None,
            book: book.into(),
            observed_at: None,
        }
    }

    #[tokio::test]
    async fn prop_evaluation_stays_on_the_common_line() {
        let fakes = nba_fakes();
        *fakes.props.props.lock().unwrap() = vec![
            points_prop("Jayson Tatum", "dk", 27.5, -115.0),
            points_prop("Jayson Tatum", "fd", 27.5, -110.0),
            points_prop("Jayson Tatum", "mgm", 34.5, 200.0),
            points_prop("Jaylen Brown", "dk", 23.5, -110.0),
        ];
        let t = test_app(&fakes);
        send(&t.app, Method::POST, "/collect/nba").await;

        let (status, body) = send(
            &t.app,
            Method::GET,
            "/props/evaluate?player=tatum&market=player_points&side=over&model_probability=0.55",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["book"], "fd");
        assert_eq!(body["line"], 27.5);
        assert_eq!(body["price"], -110.0);

        // Restricting to one book still evaluates that book's own number.
        let (_, body) = send(
            &t.app,
            Method::GET,
            "/props/evaluate?player=tatum&market=player_points&side=over&model_probability=0.55&book=mgm",
        )
        .await;
        assert_eq!(body["line"], 34.5);

        let (status, body) = send(
            &t.app,
            Method::GET,
            "/props/evaluate?player=ja&market=player_points&side=over&model_probability=0.55",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.as_str().unwrap().contains("ambiguous"));

        t.scheduler.shutdown().await;
    }
}
