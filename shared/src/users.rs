use crate::context::{ensure_same_organization, RequestContext};
use crate::contracts::{GetUsersResponse, OrganizationUser, SetUserRequest, StartResponse};
use crate::dynamo::{self, get_s, org_pk, s, user_pk, Item, METADATA_SK};
use crate::error::ApiError;
use crate::responses::{BasicResponse, ErrorKey};
use crate::types::{Organization, User, UserInOrganization, UserRole, UserState};
use crate::AppState;
use aws_sdk_dynamodb::types::{ConditionCheck, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;

fn state_str(state: UserState) -> &'static str {
    match state {
        UserState::Active => "active",
        UserState::Invited => "invited",
        UserState::Disabled => "disabled",
    }
}

fn parse_state(value: &str) -> UserState {
    match value {
        "invited" => UserState::Invited,
        "disabled" => UserState::Disabled,
        _ => UserState::Active,
    }
}

fn user_from_record(record: &Item) -> Option<User> {
    Some(User {
        id: get_s(record, "id")?,
        name: get_s(record, "name").unwrap_or_default(),
        email: get_s(record, "email").unwrap_or_default(),
        phone: get_s(record, "phone"),
        state: get_s(record, "state")
            .map(|v| parse_state(&v))
            .unwrap_or_default(),
    })
}

fn user_to_record(user: &User) -> Item {
    let mut record = HashMap::new();
    record.insert("PK".to_string(), s(user_pk(&user.id)));
    record.insert("SK".to_string(), s(METADATA_SK));
    record.insert("id".to_string(), s(user.id.clone()));
    record.insert("name".to_string(), s(user.name.clone()));
    record.insert("email".to_string(), s(user.email.clone()));
    record.insert("state".to_string(), s(state_str(user.state)));
    if let Some(phone) = &user.phone {
        record.insert("phone".to_string(), s(phone.clone()));
    }
    record
}

/// Both directions of a membership: org → user and user → org
fn membership_records(membership: &UserInOrganization) -> [Item; 2] {
    let make = |pk: String, sk: String| {
        let mut record = HashMap::new();
        record.insert("PK".to_string(), s(pk));
        record.insert("SK".to_string(), s(sk));
        record.insert("userID".to_string(), s(membership.user_id.clone()));
        record.insert(
            "organizationID".to_string(),
            s(membership.organization_id.clone()),
        );
        record.insert("role".to_string(), s(membership.role.as_str()));
        record
    };
    [
        make(
            org_pk(&membership.organization_id),
            user_pk(&membership.user_id),
        ),
        make(
            user_pk(&membership.user_id),
            org_pk(&membership.organization_id),
        ),
    ]
}

fn membership_from_record(record: &Item) -> Option<UserInOrganization> {
    Some(UserInOrganization {
        user_id: get_s(record, "userID")?,
        organization_id: get_s(record, "organizationID")?,
        role: UserRole::parse(&get_s(record, "role")?)?,
    })
}

fn organization_from_record(record: &Item) -> Option<Organization> {
    Some(Organization {
        id: get_s(record, "id")?,
        name: get_s(record, "name").unwrap_or_default(),
        image_url: get_s(record, "imageUrl"),
    })
}

async fn get_metadata(
    client: &DynamoClient,
    table_name: &str,
    pk: String,
) -> Result<Option<Item>, ApiError> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(pk))
        .key("SK", s(METADATA_SK))
        .send()
        .await?;
    Ok(result.item().cloned())
}

pub async fn load_user(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Option<User>, ApiError> {
    Ok(get_metadata(client, table_name, user_pk(user_id))
        .await?
        .as_ref()
        .and_then(user_from_record))
}

pub fn validate_user(user: &User) -> Result<(), ApiError> {
    if user.id.trim().is_empty() {
        return Err(ApiError::validation(ErrorKey::UserIdRequired, "user id is required"));
    }
    if !dynamo::is_valid_key_part(&user.id) {
        return Err(ApiError::validation(
            ErrorKey::UserIdRequired,
            "user id must not contain '#'",
        ));
    }
    if user.email.trim().is_empty() || !user.email.contains('@') {
        return Err(ApiError::validation(
            ErrorKey::InvalidRequest,
            "a valid email is required",
        ));
    }
    Ok(())
}

/// How the user being set relates to the caller's organization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Standing {
    /// No user record yet
    New,
    /// Already a member; the profile may be updated
    Member,
    /// Exists but belongs to other organizations only; the profile is theirs to change
    Outsider,
}

async fn load_standing(
    client: &DynamoClient,
    table_name: &str,
    membership: &UserInOrganization,
) -> Result<Standing, ApiError> {
    if get_metadata(client, table_name, user_pk(&membership.user_id))
        .await?
        .is_none()
    {
        return Ok(Standing::New);
    }
    let member = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(org_pk(&membership.organization_id)))
        .key("SK", s(user_pk(&membership.user_id)))
        .send()
        .await?
        .item()
        .is_some();
    Ok(if member {
        Standing::Member
    } else {
        Standing::Outsider
    })
}

fn build_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::Upstream(format!("Failed to build user write: {}", e))
}

fn put(
    table_name: &str,
    record: Item,
    condition: Option<&str>,
) -> Result<TransactWriteItem, ApiError> {
    let put = Put::builder()
        .table_name(table_name)
        .set_item(Some(record))
        .set_condition_expression(condition.map(str::to_string))
        .build()
        .map_err(build_error)?;
    Ok(TransactWriteItem::builder().put(put).build())
}

/// Writes for `set_user`, each conditioned on the standing that was read.
///
/// An outsider's profile is only checked, never overwritten, so one organization
/// cannot rewrite the name or email another organization sees.
fn set_user_actions(
    table_name: &str,
    user: &User,
    membership: &UserInOrganization,
    standing: Standing,
) -> Result<Vec<TransactWriteItem>, ApiError> {
    const EXISTS: &str = "attribute_exists(PK)";
    const ABSENT: &str = "attribute_not_exists(PK)";

    let [org_side, user_side] = membership_records(membership);
    let (profile, membership_condition) = match standing {
        Standing::New => (put(table_name, user_to_record(user), Some(ABSENT))?, None),
        Standing::Member => (
            put(table_name, user_to_record(user), Some(EXISTS))?,
            Some(EXISTS),
        ),
        Standing::Outsider => {
            let check = ConditionCheck::builder()
                .table_name(table_name)
                .key("PK", s(user_pk(&user.id)))
                .key("SK", s(METADATA_SK))
                .condition_expression(EXISTS)
                .build()
                .map_err(build_error)?;
            (
                TransactWriteItem::builder().condition_check(check).build(),
                Some(ABSENT),
            )
        }
    };

    Ok(vec![
        profile,
        put(table_name, org_side, membership_condition)?,
        put(table_name, user_side, None)?,
    ])
}

// ========== HANDLERS ==========
pub async fn get_users(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<GetUsersResponse, ApiError> {
    let organization_id = ctx.organization()?;
    let records = dynamo::query_prefix(
        &state.dynamo_client,
        &state.tables.users,
        &org_pk(organization_id),
        "USER#",
    )
    .await?;

    let mut users = Vec::with_capacity(records.len());
    for membership in records.iter().filter_map(membership_from_record) {
        match load_user(&state.dynamo_client, &state.tables.users, &membership.user_id).await? {
            Some(user) => users.push(OrganizationUser {
                user,
                role: membership.role,
            }),
            None => tracing::warn!(
                "Membership of {} in {} has no user record",
                membership.user_id,
                organization_id
            ),
        }
    }

    Ok(GetUsersResponse {
        basic: BasicResponse::ok(),
        users,
    })
}

pub async fn set_user(
    state: &AppState,
    ctx: &RequestContext,
    body: &[u8],
) -> Result<BasicResponse, ApiError> {
    let req: SetUserRequest = serde_json::from_slice(body)?;
    ensure_same_organization(ctx, &req.organization_id)?;
    validate_user(&req.user)?;

    let membership = UserInOrganization {
        user_id: req.user.id.clone(),
        organization_id: req.organization_id.clone(),
        role: req.role,
    };

    let table_name = &state.tables.users;
    let standing = load_standing(&state.dynamo_client, table_name, &membership).await?;
    if standing == Standing::Outsider {
        tracing::info!(
            "User {} already exists elsewhere; adding to {} without changing the profile",
            req.user.id,
            req.organization_id
        );
    }
    let actions = set_user_actions(table_name, &req.user, &membership, standing)?;
    dynamo::transact(&state.dynamo_client, actions, |_| {
        ApiError::conflict(
            ErrorKey::GeneralError,
            format!("User {} changed while it was being saved, please retry", req.user.id),
        )
    })
    .await?;

    tracing::info!(
        "User {} set as {} in {}",
        req.user.id,
        req.role,
        req.organization_id
    );
    Ok(BasicResponse::ok())
}

/// Everything the client needs after sign-in
pub async fn start(state: &AppState, ctx: &RequestContext) -> Result<StartResponse, ApiError> {
    let user = load_user(&state.dynamo_client, &state.tables.users, ctx.user_id())
        .await?
        .ok_or_else(|| {
            ApiError::not_found(
                ErrorKey::UserNotFound,
                format!("User {} not found", ctx.user_id()),
            )
        })?;

    let records = dynamo::query_prefix(
        &state.dynamo_client,
        &state.tables.users,
        &user_pk(ctx.user_id()),
        "ORG#",
    )
    .await?;
    let user_in_organizations: Vec<UserInOrganization> =
        records.iter().filter_map(membership_from_record).collect();

    let mut organizations = Vec::with_capacity(user_in_organizations.len());
    for membership in &user_in_organizations {
        let record = get_metadata(
            &state.dynamo_client,
            &state.tables.users,
            org_pk(&membership.organization_id),
        )
        .await?;
        match record.as_ref().and_then(organization_from_record) {
            Some(org) => organizations.push(org),
            None => tracing::warn!("Organization {} not found", membership.organization_id),
        }
    }

    Ok(StartResponse {
        basic: BasicResponse::ok(),
        user,
        user_in_organizations,
        organizations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            name: "Dana".to_string(),
            email: "dana@example.com".to_string(),
            phone: None,
            state: UserState::Invited,
        }
    }

    #[test]
    fn test_user_record_round_trip() {
        let record = user_to_record(&user());
        assert_eq!(get_s(&record, "PK").as_deref(), Some("USER#u1"));
        assert_eq!(user_from_record(&record), Some(user()));
    }

    #[test]
    fn test_membership_written_both_ways() {
        let membership = UserInOrganization {
            user_id: "u1".to_string(),
            organization_id: "o1".to_string(),
            role: UserRole::WarehouseManager,
        };
        let [org_side, user_side] = membership_records(&membership);
        assert_eq!(get_s(&org_side, "PK").as_deref(), Some("ORG#o1"));
        assert_eq!(get_s(&org_side, "SK").as_deref(), Some("USER#u1"));
        assert_eq!(get_s(&user_side, "PK").as_deref(), Some("USER#u1"));
        assert_eq!(get_s(&user_side, "SK").as_deref(), Some("ORG#o1"));
        assert_eq!(membership_from_record(&user_side), Some(membership));
    }

    #[test]
    fn test_validate_user() {
        assert!(validate_user(&user()).is_ok());

        let mut no_id = user();
        no_id.id = String::new();
        assert_eq!(
            validate_user(&no_id).unwrap_err().error_key(),
            ErrorKey::UserIdRequired
        );

        let mut bad_email = user();
        bad_email.email = "dana".to_string();
        assert!(validate_user(&bad_email).is_err());

        let mut separator = user();
        separator.id = "u1#x".to_string();
        assert_eq!(
            validate_user(&separator).unwrap_err().error_key(),
            ErrorKey::UserIdRequired
        );
    }

    fn membership() -> UserInOrganization {
        UserInOrganization {
            user_id: "u1".to_string(),
            organization_id: "o2".to_string(),
            role: UserRole::Admin,
        }
    }

    fn put_condition(action: &TransactWriteItem) -> Option<&str> {
        action.put().and_then(|p| p.condition_expression())
    }

    #[test]
    fn test_outsider_profile_is_never_overwritten() {
        let mut renamed = user();
        renamed.name = "Someone else".to_string();
        let actions =
            set_user_actions("users", &renamed, &membership(), Standing::Outsider).unwrap();

        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|a| a
            .put()
            .map(|p| get_s(p.item(), "SK").as_deref() != Some(METADATA_SK))
            .unwrap_or(true)));

        let check = actions[0].condition_check().unwrap();
        assert_eq!(get_s(check.key(), "PK").as_deref(), Some("USER#u1"));
        assert_eq!(check.condition_expression(), "attribute_exists(PK)");

        // The membership must still be new when it is written
        assert_eq!(put_condition(&actions[1]), Some("attribute_not_exists(PK)"));
        assert_eq!(get_s(actions[1].put().unwrap().item(), "PK").as_deref(), Some("ORG#o2"));
    }

    #[test]
    fn test_member_and_new_user_writes() {
        let member = set_user_actions("users", &user(), &membership(), Standing::Member).unwrap();
        assert_eq!(put_condition(&member[0]), Some("attribute_exists(PK)"));
        assert_eq!(put_condition(&member[1]), Some("attribute_exists(PK)"));
        assert_eq!(get_s(member[0].put().unwrap().item(), "name").as_deref(), Some("Dana"));

        let new = set_user_actions("users", &user(), &membership(), Standing::New).unwrap();
        assert_eq!(put_condition(&new[0]), Some("attribute_not_exists(PK)"));
        assert_eq!(put_condition(&new[1]), None);
        assert_eq!(put_condition(&new[2]), None);
    }
}
