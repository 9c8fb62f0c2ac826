// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[allow(non_snake_case)]
pub struct HandlerEnvironment {
    pub logFolder: String,
    pub statusFolder: String,
    pub configFolder: String,
    pub heartbeatFile: String,
    pub deploymentid: Option<String>,
    pub rolename: Option<String>,
    pub instance: Option<String>,
    pub hostResolverAddress: Option<String>,
    pub eventsFolder: String,
}

#[derive(Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct Handler {
    pub handlerEnvironment: HandlerEnvironment,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[allow(non_snake_case)]
pub struct StatusObj {
    pub name: String,
    pub operation: String,
    pub configurationAppliedTime: String,
    pub status: String,
    pub code: i32,
    pub formattedMessage: FormattedMessage,
    pub substatus: Vec<SubStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[allow(non_snake_case)]
pub struct FormattedMessage {
    pub lang: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[allow(non_snake_case)]
pub struct SubStatus {
    pub name: String,
    pub status: String,
    pub code: i32,
    pub formattedMessage: FormattedMessage,
}

#[derive(Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct TopLevelStatus {
    pub version: String,
    pub timestampUTC: String,
    pub status: StatusObj,
}

#[derive(Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct TopLevelHeartbeat {
    pub version: String,
    pub heartbeat: HeartbeatObj,
}

#[derive(Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct HeartbeatObj {
    pub status: String,
    pub code: String,
    pub formattedMessage: FormattedMessage,
}

/// `<configFolder>/<seq>.settings` as written by the guest agent.
#[derive(Serialize, Deserialize, Debug)]
#[allow(non_snake_case)]
pub struct HandlerSettingsFile {
    pub runtimeSettings: Vec<RuntimeSettings>,
}

#[derive(Serialize, Deserialize, Debug)]
#[allow(non_snake_case)]
pub struct RuntimeSettings {
    pub handlerSettings: HandlerSettings,
}

#[derive(Serialize, Deserialize, Debug)]
#[allow(non_snake_case)]
pub struct HandlerSettings {
    pub publicSettings: Option<PublicSettings>,
    pub protectedSettings: Option<String>,
    pub protectedSettingsCertThumbprint: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[allow(non_snake_case)]
pub struct PublicSettings {
    pub EncryptionOperation: Option<String>,
    pub VolumeType: Option<String>,
    pub PassphraseFileName: Option<String>,
}
