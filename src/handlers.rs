use std::collections::{HashMap, HashSet};

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    backend::{AuthState, DataState},
    error::{AppError, AppResult},
    guard::LOGIN_PATH,
    models::{
        AccessDenied, ActionResponse, AdminDashboard, CatalogueEntry, Course, CourseForm,
        CourseOrder, CourseRoster, EnrollRequest, HomePage, LoginRequest, Notice, ProfileForm,
        ProfilePage, ProfileUpdate, Role, SignupRequest, StudentDashboard, TeacherDashboard,
        TeacherSummary, dashboard_path, initials,
    },
    session::SessionStore,
};

// --- Query Structs ---

/// SearchQuery
///
/// Free-text filter shared by the list pages. Case-insensitive; empty or missing matches all.
#[derive(Debug, Deserialize, Default, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    pub search: Option<String>,
}

impl SearchQuery {
    fn term(&self) -> &str {
        self.search.as_deref().unwrap_or_default()
    }
}

/// ConfirmQuery
///
/// Destructive actions only go through with `?confirm=true`.
#[derive(Debug, Deserialize, Default, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}

/// Catalogue label for a course without a (known) teacher.
pub const UNASSIGNED_TEACHER: &str = "TBA";

// --- Public Pages ---

/// home
///
/// [Public Route] Who is signed in and where their dashboard is.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Home", body = HomePage))
)]
pub async fn home(State(session): State<SessionStore>) -> Json<HomePage> {
    let snapshot = session.snapshot();
    let full_name = snapshot.profile.as_ref().map(|p| p.full_name.clone());
    let role = snapshot.role();

    Json(HomePage {
        signed_in: snapshot.is_authenticated(),
        email: snapshot.identity.as_ref().map(|i| i.email.clone()),
        initials: initials(full_name.as_deref()),
        full_name,
        role,
        dashboard: snapshot
            .is_authenticated()
            .then(|| dashboard_path(role).to_string()),
    })
}

/// login
///
/// [Public Route] Signs in with email and password, resolves the role and sends the
/// user to their dashboard.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = ActionResponse),
        (status = 422, description = "Missing fields", body = Notice),
        (status = 400, description = "Invalid credentials", body = Notice)
    )
)]
pub async fn login(
    State(auth): State<AuthState>,
    State(session): State<SessionStore>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ActionResponse>> {
    let email = payload.validate()?;

    let signed_in = auth
        .sign_in(&email, &payload.password)
        .await
        .map_err(AppError::action("Login Failed"))?;

    // The backend's change notification has already started resolving this identity;
    // wait for that result so the redirect uses this sign-in's role. Resolve inline
    // only when the notification did not reach the store.
    let snapshot = if session.snapshot().user_id() == Some(signed_in.user.id) {
        session.settled().await
    } else {
        session.on_session_changed(Some(signed_in)).await;
        session.snapshot()
    };
    let role = snapshot.role();
    tracing::info!(%email, role = ?role, "signed in");

    Ok(Json(ActionResponse {
        notice: Notice::info("Welcome back!", "Logged in successfully."),
        redirect: Some(dashboard_path(role).to_string()),
    }))
}

/// signup
///
/// [Public Route] Creates an account. The database trigger creates the profile and the
/// `student` role; the optional phone number is saved once a session exists.
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = ActionResponse),
        (status = 422, description = "Invalid form", body = Notice)
    )
)]
pub async fn signup(
    State(auth): State<AuthState>,
    State(data): State<DataState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<ActionResponse>)> {
    let attributes = payload.validate()?;

    let created = auth
        .sign_up(&attributes)
        .await
        .map_err(AppError::action("Registration Failed"))?;

    if let (Some(created), Some(phone)) = (&created, &attributes.phone) {
        let update = ProfileUpdate {
            phone: Some(Some(phone.clone())),
            ..Default::default()
        };
        // The account exists at this point; a missing phone is not worth failing over.
        if let Err(e) = data.update_profile(created.user.id, &update).await {
            tracing::warn!(error = %e, user_id = %created.user.id, "could not save phone after sign-up");
        }
    }
    tracing::info!(email = %attributes.email, confirmed = created.is_some(), "account created");

    Ok((
        StatusCode::CREATED,
        Json(ActionResponse {
            notice: Notice::info(
                "Account Created!",
                "Please check your email to verify your account.",
            ),
            redirect: Some(LOGIN_PATH.to_string()),
        }),
    ))
}

/// list_catalogue
///
/// [Public Route] All courses by title, each labelled with its teacher's name.
#[utoipa::path(
    get,
    path = "/courses",
    params(SearchQuery),
    responses((status = 200, description = "Course catalogue", body = [CatalogueEntry]))
)]
pub async fn list_catalogue(
    State(data): State<DataState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<CatalogueEntry>>> {
    let (courses, teachers) = tokio::try_join!(
        data.list_courses(CourseOrder::TitleAsc),
        data.list_teacher_names()
    )
    .map_err(AppError::load("courses"))?;

    let names: HashMap<Uuid, String> = teachers
        .into_iter()
        .map(|t| (t.user_id, t.full_name))
        .collect();

    let entries = courses
        .into_iter()
        .filter(|c| c.matches_catalogue(query.term()))
        .map(|course| {
            let teacher_name = course
                .teacher_id
                .and_then(|id| names.get(&id).cloned())
                .unwrap_or_else(|| UNASSIGNED_TEACHER.to_string());
            CatalogueEntry {
                course,
                teacher_name,
            }
        })
        .collect();

    Ok(Json(entries))
}

/// access_denied
///
/// [Public Route] The page the guard's 403 points at.
#[utoipa::path(
    get,
    path = "/access-denied",
    responses((status = 200, description = "Access denied view", body = AccessDenied))
)]
pub async fn access_denied() -> Json<AccessDenied> {
    Json(AccessDenied::default())
}

/// not_found
///
/// Fallback for every unknown path. Logged so broken links show up.
pub async fn not_found(uri: Uri) -> AppError {
    tracing::warn!(path = %uri.path(), "404: user attempted to access non-existent route");
    AppError::NotFound(format!("No page at {}.", uri.path()))
}

// --- Authenticated Pages ---

/// get_profile
///
/// [Authenticated Route] The signed-in user's identity, role state and profile.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "Profile", body = ProfilePage),
        (status = 303, description = "Not signed in")
    )
)]
pub async fn get_profile(State(session): State<SessionStore>) -> AppResult<Json<ProfilePage>> {
    let snapshot = session.snapshot();
    let identity = snapshot.identity.ok_or(AppError::Unauthorized)?;

    Ok(Json(ProfilePage {
        identity,
        role: snapshot.role,
        profile: snapshot.profile,
    }))
}

/// update_profile
///
/// [Authenticated Route] Saves name, phone and batch, then re-resolves so the new
/// values are what every page sees next.
#[utoipa::path(
    put,
    path = "/profile",
    request_body = ProfileForm,
    responses(
        (status = 200, description = "Saved", body = ActionResponse),
        (status = 422, description = "Invalid form", body = Notice)
    )
)]
pub async fn update_profile(
    user: CurrentUser,
    State(data): State<DataState>,
    State(session): State<SessionStore>,
    Json(payload): Json<ProfileForm>,
) -> AppResult<Json<ActionResponse>> {
    let update = payload.validate()?;

    data.update_profile(user.id(), &update)
        .await
        .map_err(AppError::action("Error"))?;
    session.refresh().await;

    Ok(Json(ActionResponse {
        notice: Notice::info("Profile Updated", "Your profile has been saved."),
        redirect: None,
    }))
}

/// logout
///
/// [Authenticated Route] Local state is cleared before the remote call; a remote
/// failure is reported but does not sign the user back in.
#[utoipa::path(
    post,
    path = "/logout",
    responses((status = 200, description = "Signed out", body = ActionResponse))
)]
pub async fn logout(
    user: CurrentUser,
    State(session): State<SessionStore>,
) -> AppResult<Json<ActionResponse>> {
    session
        .sign_out()
        .await
        .map_err(AppError::action("Error"))?;
    tracing::info!(user_id = %user.id(), "signed out");

    Ok(Json(ActionResponse {
        notice: Notice::info("Signed Out", "You have been signed out."),
        redirect: Some(LOGIN_PATH.to_string()),
    }))
}

// --- Admin Pages ---

/// admin_dashboard
///
/// [Admin Route] Students, teachers (with how many courses each teaches) and all
/// courses, newest first. Totals count everything; the lists honour `search`.
#[utoipa::path(
    get,
    path = "/admin",
    params(SearchQuery),
    responses(
        (status = 200, description = "Admin dashboard", body = AdminDashboard),
        (status = 403, description = "Not an admin", body = AccessDenied)
    )
)]
pub async fn admin_dashboard(
    State(data): State<DataState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<AdminDashboard>> {
    let (students, teachers, courses) = tokio::try_join!(
        data.list_role_members(Role::Student),
        data.list_role_members(Role::Teacher),
        data.list_courses(CourseOrder::NewestFirst)
    )
    .map_err(AppError::load("data"))?;

    let mut course_counts: HashMap<Uuid, usize> = HashMap::new();
    for teacher_id in courses.iter().filter_map(|c| c.teacher_id) {
        *course_counts.entry(teacher_id).or_default() += 1;
    }

    let term = query.term();
    let dashboard = AdminDashboard {
        total_students: students.len(),
        total_teachers: teachers.len(),
        total_courses: courses.len(),
        students: students.into_iter().filter(|m| m.matches(term)).collect(),
        teachers: teachers
            .into_iter()
            .filter(|m| m.matches(term))
            .map(|member| TeacherSummary {
                course_count: course_counts.get(&member.user_id).copied().unwrap_or(0),
                member,
            })
            .collect(),
        courses: courses.into_iter().filter(|c| c.matches(term)).collect(),
    };

    Ok(Json(dashboard))
}

/// create_course
///
/// [Admin Route]
#[utoipa::path(
    post,
    path = "/admin/courses",
    request_body = CourseForm,
    responses(
        (status = 201, description = "Course created", body = Course),
        (status = 409, description = "Duplicate code", body = Notice),
        (status = 422, description = "Invalid form", body = Notice)
    )
)]
pub async fn create_course(
    State(data): State<DataState>,
    Json(payload): Json<CourseForm>,
) -> AppResult<(StatusCode, Json<Course>)> {
    let payload = payload.validate()?;

    let course = data
        .create_course(&payload)
        .await
        .map_err(AppError::action("Error"))?;
    tracing::info!(course_id = %course.id, code = %course.code, "{} created successfully.", course.title);

    Ok((StatusCode::CREATED, Json(course)))
}

/// update_course
///
/// [Admin Route]
#[utoipa::path(
    put,
    path = "/admin/courses/{id}",
    params(("id" = Uuid, Path, description = "Course ID")),
    request_body = CourseForm,
    responses(
        (status = 200, description = "Course updated", body = Course),
        (status = 404, description = "Not Found", body = Notice)
    )
)]
pub async fn update_course(
    State(data): State<DataState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourseForm>,
) -> AppResult<Json<Course>> {
    let payload = payload.validate()?;

    let course = data
        .update_course(id, &payload)
        .await
        .map_err(AppError::action("Error"))?
        .ok_or_else(|| AppError::NotFound("Course not found.".to_string()))?;
    tracing::info!(course_id = %course.id, "{} updated successfully.", course.title);

    Ok(Json(course))
}

/// delete_course
///
/// [Admin Route] Removes the course and, through the cascade, its enrollments.
/// Without `?confirm=true` nothing is deleted and the confirmation prompt comes back.
#[utoipa::path(
    delete,
    path = "/admin/courses/{id}",
    params(("id" = Uuid, Path, description = "Course ID"), ConfirmQuery),
    responses(
        (status = 200, description = "Course deleted", body = ActionResponse),
        (status = 404, description = "Not Found", body = Notice),
        (status = 428, description = "Confirmation required", body = Notice)
    )
)]
pub async fn delete_course(
    State(data): State<DataState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ConfirmQuery>,
) -> AppResult<Json<ActionResponse>> {
    let course = data
        .get_course(id)
        .await
        .map_err(AppError::load("courses"))?
        .ok_or_else(|| AppError::NotFound("Course not found.".to_string()))?;

    if !query.confirm {
        return Err(AppError::ConfirmationRequired(format!(
            "Delete \"{}\"? This will also remove all enrollments.",
            course.title
        )));
    }

    let deleted = data
        .delete_course(id)
        .await
        .map_err(AppError::action("Error"))?;
    if !deleted {
        return Err(AppError::NotFound("Course not found.".to_string()));
    }

    Ok(Json(ActionResponse {
        notice: Notice::info("Course Deleted", format!("{} has been removed.", course.title)),
        redirect: None,
    }))
}

/// promote_user
///
/// [Admin Route] Makes a user a teacher. If the admin promoted themselves, the session
/// store re-resolves so the new role takes effect on the next request.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/promote",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Role updated", body = ActionResponse),
        (status = 404, description = "No role record", body = Notice)
    )
)]
pub async fn promote_user(
    user: CurrentUser,
    State(data): State<DataState>,
    State(session): State<SessionStore>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ActionResponse>> {
    data.set_role(id, Role::Teacher)
        .await
        .map_err(AppError::action("Error"))?;
    tracing::info!(admin = %user.id(), user_id = %id, "user promoted to teacher");

    if id == user.id() {
        session.refresh().await;
    }

    Ok(Json(ActionResponse {
        notice: Notice::info("Role Updated", "User promoted to Teacher."),
        redirect: None,
    }))
}

// --- Teacher Pages ---

/// teacher_dashboard
///
/// [Teacher Route] Courses taught by the signed-in teacher, newest first.
#[utoipa::path(
    get,
    path = "/teacher",
    responses(
        (status = 200, description = "Teacher dashboard", body = TeacherDashboard),
        (status = 403, description = "Not a teacher", body = AccessDenied)
    )
)]
pub async fn teacher_dashboard(
    user: CurrentUser,
    State(data): State<DataState>,
) -> AppResult<Json<TeacherDashboard>> {
    let courses = data
        .list_teacher_courses(user.id())
        .await
        .map_err(AppError::load("courses"))?;

    Ok(Json(TeacherDashboard {
        full_name: user.full_name(),
        courses,
    }))
}

/// course_roster
///
/// [Teacher Route] Students enrolled in one of the teacher's own courses. Another
/// teacher's course is reported as not found.
#[utoipa::path(
    get,
    path = "/teacher/courses/{id}/enrollments",
    params(("id" = Uuid, Path, description = "Course ID"), SearchQuery),
    responses(
        (status = 200, description = "Enrolled students", body = CourseRoster),
        (status = 404, description = "Not Found", body = Notice)
    )
)]
pub async fn course_roster(
    user: CurrentUser,
    State(data): State<DataState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<CourseRoster>> {
    let course = data
        .get_course(id)
        .await
        .map_err(AppError::load("courses"))?
        .filter(|c| c.teacher_id == Some(user.id()))
        .ok_or_else(|| AppError::NotFound("Course not found.".to_string()))?;

    let enrolled = data
        .list_course_enrollments(course.id)
        .await
        .map_err(AppError::load("enrollments"))?;

    Ok(Json(CourseRoster {
        course,
        total: enrolled.len(),
        students: enrolled
            .into_iter()
            .filter(|e| e.matches(query.term()))
            .collect(),
    }))
}

// --- Student Pages ---

/// student_dashboard
///
/// [Student Route] The catalogue split into the courses the student takes and the rest.
#[utoipa::path(
    get,
    path = "/student",
    responses(
        (status = 200, description = "Student dashboard", body = StudentDashboard),
        (status = 403, description = "Not a student", body = AccessDenied)
    )
)]
pub async fn student_dashboard(
    user: CurrentUser,
    State(data): State<DataState>,
) -> AppResult<Json<StudentDashboard>> {
    let (courses, enrollments) = tokio::try_join!(
        data.list_courses(CourseOrder::TitleAsc),
        data.list_student_enrollments(user.id())
    )
    .map_err(AppError::load("courses"))?;

    let enrolled_ids: HashSet<Uuid> = enrollments.iter().map(|e| e.course_id).collect();
    let (enrolled, available) = courses
        .into_iter()
        .partition(|c| enrolled_ids.contains(&c.id));

    Ok(Json(StudentDashboard {
        full_name: user.full_name(),
        enrolled,
        available,
    }))
}

/// enroll
///
/// [Student Route]
#[utoipa::path(
    post,
    path = "/student/enrollments",
    request_body = EnrollRequest,
    responses(
        (status = 201, description = "Enrolled", body = ActionResponse),
        (status = 404, description = "Unknown course", body = Notice),
        (status = 409, description = "Already enrolled", body = Notice)
    )
)]
pub async fn enroll(
    user: CurrentUser,
    State(data): State<DataState>,
    Json(payload): Json<EnrollRequest>,
) -> AppResult<(StatusCode, Json<ActionResponse>)> {
    data.get_course(payload.course_id)
        .await
        .map_err(AppError::load("courses"))?
        .ok_or_else(|| AppError::NotFound("Course not found.".to_string()))?;

    let enrollment = data
        .enroll(user.id(), payload.course_id)
        .await
        .map_err(AppError::action("Error"))?;
    tracing::info!(enrollment_id = %enrollment.id, course_id = %payload.course_id, "enrolled");

    Ok((
        StatusCode::CREATED,
        Json(ActionResponse {
            notice: Notice::info("Enrolled!", "You have been enrolled in the course."),
            redirect: None,
        }),
    ))
}

/// unenroll
///
/// [Student Route] Requires `?confirm=true`.
#[utoipa::path(
    delete,
    path = "/student/enrollments/{course_id}",
    params(("course_id" = Uuid, Path, description = "Course ID"), ConfirmQuery),
    responses(
        (status = 200, description = "Unenrolled", body = ActionResponse),
        (status = 404, description = "Not enrolled", body = Notice),
        (status = 428, description = "Confirmation required", body = Notice)
    )
)]
pub async fn unenroll(
    user: CurrentUser,
    State(data): State<DataState>,
    Path(course_id): Path<Uuid>,
    Query(query): Query<ConfirmQuery>,
) -> AppResult<Json<ActionResponse>> {
    if !query.confirm {
        return Err(AppError::ConfirmationRequired(
            "Unenroll from this course?".to_string(),
        ));
    }

    let removed = data
        .unenroll(user.id(), course_id)
        .await
        .map_err(AppError::action("Error"))?;
    if !removed {
        return Err(AppError::NotFound("Enrollment not found.".to_string()));
    }

    Ok(Json(ActionResponse {
        notice: Notice::info("Unenrolled", "You have been removed from the course."),
        redirect: None,
    }))
}
