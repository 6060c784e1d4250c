// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! REST client for a Camunda-style engine HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    EngineDeployment, EngineError, EngineInstance, EngineInstanceState, EngineTask, NewEngineGroup,
    NewEngineUser, ProcessEngine, Result,
};

/// Connection settings for [`RestEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the engine REST API, without a trailing slash.
    pub base_url: String,
    /// Basic-auth username, if the engine requires authentication.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/engine-rest".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`ProcessEngine`] implementation over HTTP.
pub struct RestEngine {
    client: reqwest::Client,
    config: EngineConfig,
}

impl RestEngine {
    /// Build a client from connection settings.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let builder = self.client.request(method, url);
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_deref()),
            None => builder,
        }
    }

    /// Turn a non-success response into an [`EngineError`], extracting the
    /// engine's error message from the body when it sends one.
    async fn check(resource: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(resource.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<EngineErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        Err(EngineError::Status {
            code: status.as_u16(),
            message,
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let response = self.request(Method::GET, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(path, response).await?;
        Ok(true)
    }

    async fn task_query(&self, path: &str) -> Result<Vec<EngineTask>> {
        let response = self.request(Method::GET, path).send().await?;
        Ok(Self::check("/task", response).await?.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct EngineErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct DeploymentResponse {
    id: String,
    definitions: Vec<DeployedDefinition>,
}

#[derive(Debug, Deserialize)]
struct DeployedDefinition {
    id: String,
    key: String,
    name: Option<String>,
    version: i32,
}

#[derive(Debug, Deserialize)]
struct StartInstanceResponse {
    id: String,
    #[serde(rename = "definitionId")]
    definition_id: String,
    #[serde(default)]
    ended: bool,
}

#[derive(Debug, Deserialize)]
struct RuntimeInstance {
    #[serde(default)]
    suspended: bool,
}

#[derive(Debug, Deserialize)]
struct HistoricInstance {
    state: EngineInstanceState,
}

#[derive(Debug, Deserialize)]
struct GroupRef {
    id: String,
}

#[async_trait]
impl ProcessEngine for RestEngine {
    async fn deploy(
        &self,
        deployment_name: &str,
        resource_name: &str,
        xml: &str,
    ) -> Result<EngineDeployment> {
        debug!(deployment_name, resource_name, "deploying definition to engine");
        let body = json!({
            "deployment-name": deployment_name,
            "resources": [{ "name": resource_name, "content": xml }],
        });
        let response = self
            .request(Method::POST, "/deployment/create")
            .json(&body)
            .send()
            .await?;
        let deployment: DeploymentResponse = Self::check("/deployment/create", response)
            .await?
            .json()
            .await?;
        let definition = deployment.definitions.into_iter().next().ok_or_else(|| {
            EngineError::UnexpectedResponse("deployment produced no definitions".to_string())
        })?;
        Ok(EngineDeployment {
            engine_id: definition.id,
            key: definition.key,
            name: definition.name,
            version: definition.version,
            deployment_id: deployment.id,
        })
    }

    async fn start_instance(
        &self,
        key: &str,
        variables: &serde_json::Value,
    ) -> Result<EngineInstance> {
        let path = format!("/process-definition/key/{key}/start");
        let response = self
            .request(Method::POST, &path)
            .json(&json!({ "variables": variables }))
            .send()
            .await?;
        let started: StartInstanceResponse = Self::check(&path, response).await?.json().await?;
        Ok(EngineInstance {
            instance_id: started.id,
            definition_id: started.definition_id,
            ended: started.ended,
        })
    }

    async fn instance_state(&self, instance_id: &str) -> Result<Option<EngineInstanceState>> {
        let path = format!("/process-instance/{instance_id}");
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let instance: RuntimeInstance = Self::check(&path, response).await?.json().await?;
        Ok(Some(if instance.suspended {
            EngineInstanceState::Suspended
        } else {
            EngineInstanceState::Active
        }))
    }

    async fn historic_instance_state(
        &self,
        instance_id: &str,
    ) -> Result<Option<EngineInstanceState>> {
        let path = format!("/history/process-instance/{instance_id}");
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let instance: HistoricInstance = Self::check(&path, response).await?.json().await?;
        Ok(Some(instance.state))
    }

    async fn create_user(&self, user: &NewEngineUser) -> Result<()> {
        let response = self
            .request(Method::POST, "/user")
            .json(user)
            .send()
            .await?;
        Self::check("/user", response).await?;
        Ok(())
    }

    async fn user_exists(&self, id: &str) -> Result<bool> {
        self.exists(&format!("/user/{id}")).await
    }

    async fn create_group(&self, group: &NewEngineGroup) -> Result<()> {
        let response = self
            .request(Method::POST, "/group")
            .json(group)
            .send()
            .await?;
        Self::check("/group", response).await?;
        Ok(())
    }

    async fn group_exists(&self, id: &str) -> Result<bool> {
        self.exists(&format!("/group/{id}")).await
    }

    async fn create_membership(&self, group_id: &str, user_id: &str) -> Result<()> {
        let path = format!("/group/{group_id}/members/{user_id}");
        let response = self.request(Method::PUT, &path).send().await?;
        Self::check(&path, response).await?;
        Ok(())
    }

    async fn membership_exists(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.exists(&format!("/group/{group_id}/members/{user_id}"))
            .await
    }

    async fn groups_of_user(&self, user_id: &str) -> Result<Vec<String>> {
        let path = format!("/group?member={user_id}");
        let response = self.request(Method::GET, &path).send().await?;
        let groups: Vec<GroupRef> = Self::check("/group", response).await?.json().await?;
        Ok(groups.into_iter().map(|g| g.id).collect())
    }

    async fn tasks_assigned_to(&self, user_id: &str) -> Result<Vec<EngineTask>> {
        self.task_query(&format!("/task?assignee={user_id}")).await
    }

    async fn tasks_with_candidate_user(&self, user_id: &str) -> Result<Vec<EngineTask>> {
        self.task_query(&format!("/task?candidateUser={user_id}"))
            .await
    }

    async fn tasks_with_candidate_groups(&self, group_ids: &[String]) -> Result<Vec<EngineTask>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.task_query(&format!("/task?candidateGroups={}", group_ids.join(",")))
            .await
    }

    async fn tasks_in_instance(&self, instance_id: &str) -> Result<Vec<EngineTask>> {
        self.task_query(&format!("/task?processInstanceId={instance_id}"))
            .await
    }

    async fn claim_task(&self, task_id: &str, user_id: &str) -> Result<()> {
        let path = format!("/task/{task_id}/claim");
        let response = self
            .request(Method::POST, &path)
            .json(&json!({ "userId": user_id }))
            .send()
            .await?;
        Self::check(&path, response).await?;
        Ok(())
    }

    async fn complete_task(&self, task_id: &str, variables: &serde_json::Value) -> Result<()> {
        let path = format!("/task/{task_id}/complete");
        let response = self
            .request(Method::POST, &path)
            .json(&json!({ "variables": variables }))
            .send()
            .await?;
        Self::check(&path, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn engine(server: &MockServer) -> RestEngine {
        RestEngine::new(EngineConfig {
            base_url: server.uri(),
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn deploy_adopts_engine_assigned_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/deployment/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "dep-77",
                "definitions": [{
                    "id": "Process_order:3:abc",
                    "key": "Process_order",
                    "name": "Order Process",
                    "version": 3
                }]
            })))
            .mount(&server)
            .await;

        let deployment = engine(&server)
            .await
            .deploy("orders", "orders.bpmn", "<definitions/>")
            .await
            .unwrap();
        assert_eq!(deployment.engine_id, "Process_order:3:abc");
        assert_eq!(deployment.key, "Process_order");
        assert_eq!(deployment.version, 3);
        assert_eq!(deployment.deployment_id, "dep-77");
    }

    #[tokio::test]
    async fn start_instance_posts_variables() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process-definition/key/Process_order/start"))
            .and(body_json_string(
                r#"{"variables":{"requester":"alice"}}"#,
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "inst-1",
                "definitionId": "Process_order:3:abc"
            })))
            .mount(&server)
            .await;

        let instance = engine(&server)
            .await
            .start_instance("Process_order", &serde_json::json!({"requester": "alice"}))
            .await
            .unwrap();
        assert_eq!(instance.instance_id, "inst-1");
        assert!(!instance.ended);
    }

    #[tokio::test]
    async fn task_queries_use_engine_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/task"))
            .and(query_param("candidateGroups", "group1,group2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "task-9",
                "name": "Approve",
                "assignee": null,
                "processInstanceId": "inst-1",
                "taskDefinitionKey": "Task_approve",
                "created": null,
                "due": null,
                "priority": 50
            }])))
            .mount(&server)
            .await;

        let tasks = engine(&server)
            .await
            .tasks_with_candidate_groups(&["group1".to_string(), "group2".to_string()])
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "task-9");
        assert_eq!(tasks[0].task_definition_key.as_deref(), Some("Task_approve"));
    }

    #[tokio::test]
    async fn empty_candidate_group_query_skips_the_engine() {
        let server = MockServer::start().await;
        let tasks = engine(&server)
            .await
            .tasks_with_candidate_groups(&[])
            .await
            .unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn error_body_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/deployment/create"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "type": "ParseException",
                "message": "cannot parse resource"
            })))
            .mount(&server)
            .await;

        let err = engine(&server)
            .await
            .deploy("orders", "orders.bpmn", "not-xml")
            .await
            .unwrap_err();
        match err {
            EngineError::Status { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "cannot parse resource");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_instance_reads_as_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/process-instance/inst-gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/process-instance/inst-gone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": "COMPLETED"
            })))
            .mount(&server)
            .await;

        let engine = engine(&server).await;
        assert_eq!(engine.instance_state("inst-gone").await.unwrap(), None);
        assert_eq!(
            engine.historic_instance_state("inst-gone").await.unwrap(),
            Some(EngineInstanceState::Completed)
        );
    }

    #[tokio::test]
    async fn directory_existence_checks_map_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/user1234"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "user1234"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let engine = engine(&server).await;
        assert!(engine.user_exists("user1234").await.unwrap());
        assert!(!engine.user_exists("ghost").await.unwrap());
    }
}
