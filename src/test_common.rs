#![cfg(test)]

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::experiment::Experiment;
use crate::in_app_message::{InAppMessageImpression, InAppMessageImpressionStorage};
use crate::overrides::ManualOverrideStorage;
use crate::user::HackleUser;
use crate::workspace::DefaultWorkspace;

/// Every bucket uses seed 42 and 100 slots; murmur3("user-1", 42) lands on slot 56.
pub fn workspace() -> DefaultWorkspace {
    DefaultWorkspace::from_json(WORKSPACE).unwrap()
}

/// Manual overrides keyed by experiment id and the identifier of the experiment's type.
pub struct InMemoryManualOverrideStorage {
    overrides: Mutex<HashMap<(i64, String), i64>>,
}

impl InMemoryManualOverrideStorage {
    pub fn new() -> Self {
        Self {
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, experiment_id: i64, identifier: &str, variation_id: i64) {
        self.overrides
            .lock()
            .unwrap()
            .insert((experiment_id, identifier.to_string()), variation_id);
    }
}

impl ManualOverrideStorage for InMemoryManualOverrideStorage {
    fn get(&self, experiment: &Experiment, user: &HackleUser) -> Option<i64> {
        let identifier = user.identifier(&experiment.identifier_type)?;
        self.overrides
            .lock()
            .unwrap()
            .get(&(experiment.id, identifier.to_string()))
            .copied()
    }
}

pub struct InMemoryImpressionStorage {
    impressions: Mutex<HashMap<i64, Vec<InAppMessageImpression>>>,
}

impl InMemoryImpressionStorage {
    pub fn new() -> Self {
        Self {
            impressions: Mutex::new(HashMap::new()),
        }
    }
}

impl InAppMessageImpressionStorage for InMemoryImpressionStorage {
    fn get(&self, in_app_message_id: i64) -> Result<Vec<InAppMessageImpression>> {
        Ok(self
            .impressions
            .lock()
            .unwrap()
            .get(&in_app_message_id)
            .cloned()
            .unwrap_or_default())
    }

    fn set(&self, in_app_message_id: i64, impressions: Vec<InAppMessageImpression>) -> Result<()> {
        self.impressions
            .lock()
            .unwrap()
            .insert(in_app_message_id, impressions);
        Ok(())
    }
}

const WORKSPACE: &str = r#"{
    "experiments": [
        {
            "id": 1001, "key": 1, "identifierType": "$id", "version": 1,
            "variations": [
                {"id": 1, "key": "A", "status": "ACTIVE"},
                {"id": 2, "key": "B", "status": "ACTIVE", "parameterConfigurationId": 900}
            ],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "BUCKET", "bucketId": 10}}
        },
        {
            "id": 1002, "key": 2, "identifierType": "$id", "version": 1,
            "variations": [
                {"id": 2001, "key": "A", "status": "ACTIVE"},
                {"id": 2002, "key": "B", "status": "DROPPED"}
            ],
            "execution": {
                "status": "RUNNING", "version": 3,
                "userOverrides": [{"userId": "overridden-user", "variationId": 2001}],
                "segmentOverrides": [{
                    "target": {"conditions": [{
                        "key": {"type": "SEGMENT", "name": "SEGMENT"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["gold_members"]}
                    }]},
                    "action": {"type": "VARIATION", "variationId": 2001}
                }],
                "targetAudiences": [],
                "targetRules": [],
                "defaultRule": {"type": "BUCKET", "bucketId": 20}
            }
        },
        {
            "id": 1003, "key": 3, "identifierType": "$id", "version": 1,
            "variations": [{"id": 3001, "key": "A", "status": "ACTIVE"}, {"id": 3002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "READY", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 3002}}
        },
        {
            "id": 1004, "key": 4, "identifierType": "$id", "version": 1,
            "variations": [{"id": 4001, "key": "A", "status": "ACTIVE"}, {"id": 4002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "PAUSED", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 4002}}
        },
        {
            "id": 1005, "key": 5, "identifierType": "$id", "version": 1, "winnerVariationId": 5002,
            "variations": [{"id": 5001, "key": "A", "status": "ACTIVE"}, {"id": 5002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "STOPPED", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 5001}}
        },
        {
            "id": 1006, "key": 6, "identifierType": "$id", "version": 1, "winnerVariationId": null,
            "variations": [{"id": 6001, "key": "A", "status": "ACTIVE"}, {"id": 6002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "STOPPED", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 6001}}
        },
        {
            "id": 1007, "key": 7, "identifierType": "$id", "version": 1,
            "variations": [{"id": 7001, "key": "A", "status": "ACTIVE"}, {"id": 7002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetAudiences": [{"conditions": [{
                    "key": {"type": "USER_PROPERTY", "name": "grade"},
                    "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["GOLD"]}
                }]}],
                "defaultRule": {"type": "BUCKET", "bucketId": 70}
            }
        },
        {
            "id": 1008, "key": 8, "identifierType": "$id", "version": 1,
            "variations": [{"id": 8001, "key": "A", "status": "ACTIVE"}, {"id": 8002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "BUCKET", "bucketId": 80}}
        },
        {
            "id": 1009, "key": 9, "identifierType": "$id", "version": 1,
            "variations": [{"id": 9001, "key": "A", "status": "ACTIVE"}, {"id": 9002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetAudiences": [{"conditions": [{
                    "key": {"type": "AB_TEST", "name": "1"},
                    "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["B"]}
                }]}],
                "defaultRule": {"type": "VARIATION", "variationId": 9002}
            }
        },
        {
            "id": 1010, "key": 10, "identifierType": "$id", "version": 1, "containerId": 500,
            "variations": [{"id": 10001, "key": "A", "status": "ACTIVE"}, {"id": 10002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 10002}}
        },
        {
            "id": 1011, "key": 11, "identifierType": "$id", "version": 1, "containerId": 500,
            "variations": [{"id": 11001, "key": "A", "status": "ACTIVE"}, {"id": 11002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 11002}}
        },
        {
            "id": 1012, "key": 12, "identifierType": "$id", "version": 1, "containerId": 404,
            "variations": [{"id": 12001, "key": "A", "status": "ACTIVE"}, {"id": 12002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 12002}}
        },
        {
            "id": 1013, "key": 13, "identifierType": "$id", "version": 1, "containerId": 501,
            "variations": [{"id": 13001, "key": "A", "status": "ACTIVE"}, {"id": 13002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 13002}}
        },
        {
            "id": 1014, "key": 14, "identifierType": "$id", "version": 1, "containerId": 502,
            "variations": [{"id": 14001, "key": "A", "status": "ACTIVE"}, {"id": 14002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 14002}}
        },
        {
            "id": 1015, "key": 15, "identifierType": "$id", "version": 1,
            "variations": [{"id": 15001, "key": "A", "status": "ACTIVE"}, {"id": 15002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetAudiences": [{"conditions": [{
                    "key": {"type": "AB_TEST", "name": "16"},
                    "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["A"]}
                }]}],
                "defaultRule": {"type": "VARIATION", "variationId": 15001}
            }
        },
        {
            "id": 1016, "key": 16, "identifierType": "$id", "version": 1,
            "variations": [{"id": 16001, "key": "A", "status": "ACTIVE"}, {"id": 16002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetAudiences": [{"conditions": [{
                    "key": {"type": "AB_TEST", "name": "15"},
                    "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["A"]}
                }]}],
                "defaultRule": {"type": "VARIATION", "variationId": 16001}
            }
        },
        {
            "id": 1018, "key": 18, "identifierType": "$id", "version": 1,
            "variations": [
                {"id": 18001, "key": "A", "status": "ACTIVE", "parameterConfigurationId": 404},
                {"id": 18002, "key": "B", "status": "ACTIVE"}
            ],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 18002}}
        },
        {
            "id": 1019, "key": 19, "identifierType": "$id", "version": 1,
            "variations": [{"id": 19001, "key": "A", "status": "ACTIVE"}, {"id": 19002, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 404}}
        },
        {
            "id": 1020, "key": 20, "identifierType": "$id", "version": 1,
            "variations": [{"id": 20001, "key": "A", "status": "ACTIVE"}, {"id": 20002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetAudiences": [{"conditions": [
                    {
                        "key": {"type": "AB_TEST", "name": "21"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["B"]}
                    },
                    {
                        "key": {"type": "AB_TEST", "name": "22"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["B"]}
                    }
                ]}],
                "defaultRule": {"type": "VARIATION", "variationId": 20002}
            }
        },
        {
            "id": 1021, "key": 21, "identifierType": "$id", "version": 1,
            "variations": [{"id": 21001, "key": "A", "status": "ACTIVE"}, {"id": 21002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetAudiences": [{"conditions": [
                    {
                        "key": {"type": "AB_TEST", "name": "23"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["B"]}
                    }
                ]}],
                "defaultRule": {"type": "VARIATION", "variationId": 21002}
            }
        },
        {
            "id": 1022, "key": 22, "identifierType": "$id", "version": 1,
            "variations": [{"id": 22001, "key": "A", "status": "ACTIVE"}, {"id": 22002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetAudiences": [{"conditions": [
                    {
                        "key": {"type": "AB_TEST", "name": "23"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["B"]}
                    }
                ]}],
                "defaultRule": {"type": "VARIATION", "variationId": 22002}
            }
        },
        {
            "id": 1023, "key": 23, "identifierType": "$id", "version": 1,
            "variations": [{"id": 23001, "key": "A", "status": "ACTIVE"}, {"id": 23002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "defaultRule": {"type": "VARIATION", "variationId": 23002}
            }
        }
    ],
    "featureFlags": [
        {
            "id": 3001, "key": 1, "identifierType": "$id", "version": 1,
            "variations": [{"id": 3001, "key": "A", "status": "ACTIVE"}, {"id": 3002, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 2,
                "userOverrides": [{"userId": "ff-overridden", "variationId": 3002}],
                "targetRules": [{
                    "target": {"conditions": [{
                        "key": {"type": "USER_PROPERTY", "name": "grade"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["GOLD"]}
                    }]},
                    "action": {"type": "VARIATION", "variationId": 3002}
                }],
                "defaultRule": {"type": "VARIATION", "variationId": 3001}
            }
        },
        {
            "id": 3002, "key": 2, "identifierType": "$id", "version": 1,
            "variations": [{"id": 3201, "key": "A", "status": "ACTIVE"}, {"id": 3202, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "PAUSED", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 3202}}
        },
        {
            "id": 3003, "key": 3, "identifierType": "$id", "version": 1,
            "variations": [{"id": 3301, "key": "A", "status": "ACTIVE"}, {"id": 3302, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "READY", "version": 1, "defaultRule": {"type": "VARIATION", "variationId": 3302}}
        },
        {
            "id": 3004, "key": 4, "identifierType": "$id", "version": 1,
            "variations": [{"id": 3401, "key": "A", "status": "ACTIVE"}, {"id": 3402, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetRules": [{
                    "target": {"conditions": [{
                        "key": {"type": "USER_PROPERTY", "name": "grade"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["GOLD"]}
                    }]},
                    "action": {"type": "BUCKET", "bucketId": 81}
                }],
                "defaultRule": {"type": "VARIATION", "variationId": 3401}
            }
        },
        {
            "id": 3005, "key": 5, "identifierType": "$id", "version": 1,
            "variations": [{"id": 3501, "key": "A", "status": "ACTIVE"}, {"id": 3502, "key": "B", "status": "ACTIVE"}],
            "execution": {
                "status": "RUNNING", "version": 1,
                "targetRules": [{
                    "target": {"conditions": [{
                        "key": {"type": "FEATURE_FLAG", "name": "1"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "BOOLEAN", "values": [true]}
                    }]},
                    "action": {"type": "VARIATION", "variationId": 3502}
                }],
                "defaultRule": {"type": "VARIATION", "variationId": 3501}
            }
        },
        {
            "id": 3006, "key": 6, "identifierType": "$id", "version": 1,
            "variations": [{"id": 3601, "key": "A", "status": "ACTIVE"}, {"id": 3602, "key": "B", "status": "ACTIVE"}],
            "execution": {"status": "RUNNING", "version": 1, "defaultRule": {"type": "BUCKET", "bucketId": 60}}
        }
    ],
    "buckets": [
        {"id": 10, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 50, "variationId": 1},
            {"startInclusive": 50, "endExclusive": 100, "variationId": 2}
        ]},
        {"id": 20, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 50, "variationId": 2001},
            {"startInclusive": 50, "endExclusive": 100, "variationId": 2002}
        ]},
        {"id": 50, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 50, "variationId": 1},
            {"startInclusive": 50, "endExclusive": 100, "variationId": 2}
        ]},
        {"id": 52, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 100, "variationId": 99}
        ]},
        {"id": 60, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 100, "variationId": 3602}
        ]},
        {"id": 70, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 100, "variationId": 7002}
        ]},
        {"id": 80, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 10, "variationId": 8001}
        ]},
        {"id": 81, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 10, "variationId": 3401}
        ]},
        {"id": 90, "seed": 42, "slotSize": 100, "slots": [
            {"startInclusive": 0, "endExclusive": 100, "variationId": 1}
        ]}
    ],
    "containers": [
        {"id": 500, "bucketId": 50, "groups": [
            {"id": 1, "experiments": [1010]},
            {"id": 2, "experiments": [1011]}
        ]},
        {"id": 501, "bucketId": 404, "groups": [{"id": 1, "experiments": [1013]}]},
        {"id": 502, "bucketId": 52, "groups": [{"id": 1, "experiments": [1014]}]}
    ],
    "segments": [
        {
            "id": 1, "key": "gold_members", "type": "USER_PROPERTY",
            "targets": [{"conditions": [{
                "key": {"type": "USER_PROPERTY", "name": "grade"},
                "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["GOLD"]}
            }]}]
        },
        {
            "id": 2, "key": "internal_users", "type": "USER_ID",
            "targets": [{"conditions": [{
                "key": {"type": "USER_ID", "name": "$id"},
                "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["tester"]}
            }]}]
        }
    ],
    "parameterConfigurations": [
        {"id": 900, "parameters": [
            {"key": "button_color", "value": "red"},
            {"key": "discount", "value": 10}
        ]}
    ],
    "remoteConfigParameters": [
        {
            "id": 1, "key": "banner_text", "type": "STRING", "identifierType": "$id",
            "targetRules": [{
                "key": "rule-1", "name": "gold",
                "target": {"conditions": [{
                    "key": {"type": "USER_PROPERTY", "name": "grade"},
                    "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["GOLD"]}
                }]},
                "bucketId": 90,
                "value": {"id": 11, "value": "gold banner"}
            }],
            "defaultValue": {"id": 10, "value": "default banner"}
        },
        {
            "id": 2, "key": "max_items", "type": "NUMBER", "identifierType": "$id",
            "targetRules": [{
                "key": "rule-2", "name": "internal",
                "target": {"conditions": [{
                    "key": {"type": "SEGMENT", "name": "SEGMENT"},
                    "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["internal_users"]}
                }]},
                "bucketId": 404,
                "value": {"id": 21, "value": 100}
            }],
            "defaultValue": {"id": 20, "value": 10}
        },
        {
            "id": 3, "key": "partial_rollout", "type": "STRING", "identifierType": "$id",
            "targetRules": [{
                "key": "rule-3", "name": "ios",
                "target": {"conditions": [{
                    "key": {"type": "HACKLE_PROPERTY", "name": "platform"},
                    "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["iOS"]}
                }]},
                "bucketId": 80,
                "value": {"id": 31, "value": "rolled out"}
            }],
            "defaultValue": {"id": 30, "value": "default"}
        }
    ]
}"#;
